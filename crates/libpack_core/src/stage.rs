use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use serde::{Deserialize, Serialize};

use libpack_sourcemap::SourceMap;

use crate::error::StageError;
use crate::types::{LibraryInfo, TargetDescriptor};

/// Names of the built-in stages
pub mod names {
  pub const REPLACE: &str = "replace";
  pub const TYPESCRIPT: &str = "typescript";
  pub const RESOLVE: &str = "resolve";
  pub const DOWNLEVEL: &str = "downlevel";
  pub const COMMONJS: &str = "commonjs";
  pub const VERSION_TAG: &str = "version-tag";
  pub const FORMAT: &str = "format";
  pub const MINIFY: &str = "minify";
  pub const OPTIMIZE: &str = "optimize";
}

/// What a stage did to the positions of its input
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MapEffect {
  /// A new map from the stage output onto the stage input
  Remapped { map: SourceMap },
  /// Lines were inserted at the top, everything else is unchanged
  Shifted { lines: u32 },
  Unchanged,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StageOutput {
  pub code: String,
  pub map: MapEffect,
}

impl StageOutput {
  pub fn unchanged(code: &str) -> Self {
    Self {
      code: code.to_string(),
      map: MapEffect::Unchanged,
    }
  }
}

/// Everything a stage may read besides the code it transforms
#[derive(Clone, Copy, Debug)]
pub struct StageContext<'a> {
  pub project_root: &'a Path,

  /// Source module for per-module targets, the declared output file for bundles
  pub file_path: &'a Path,

  pub target: &'a TargetDescriptor,

  pub library: &'a LibraryInfo,

  /// Import specifiers of this module mapped to the specifier they are emitted as
  pub specifiers: &'a BTreeMap<String, String>,
}

/// One step of a target pipeline.
///
/// Stages are pure: the same input code, context and configuration always produce the same
/// output, which is what allows their results to be cached.
pub trait Stage: Debug + Send + Sync {
  fn name(&self) -> &'static str;

  /// Hash of the stage configuration and of every target setting the stage reads
  fn config_hash(&self, target: &TargetDescriptor, library: &LibraryInfo) -> u64;

  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn stage_outputs_serialize_their_map_effect() {
    let output = StageOutput {
      code: String::from("/* mylib @1.0.0 */\nexport {};"),
      map: MapEffect::Shifted { lines: 1 },
    };

    let json = serde_json::to_string(&output).unwrap();

    assert_eq!(
      json,
      r#"{"code":"/* mylib @1.0.0 */\nexport {};","map":{"type":"shifted","lines":1}}"#
    );
    assert_eq!(serde_json::from_str::<StageOutput>(&json).unwrap(), output);
  }
}
