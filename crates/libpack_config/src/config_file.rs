use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use libpack_core::types::{OutputFormat, StageRef};

/// The contents of `libpack.config.json5`, before defaults are applied
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
  #[serde(default)]
  pub library: LibraryEntry,
  #[serde(default)]
  pub env: IndexMap<String, String>,
  pub version_tag: Option<String>,
  pub module_side_effects: Option<bool>,
  pub targets: Vec<TargetEntry>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LibraryEntry {
  /// Falls back to the name in package.json, without its scope
  pub name: Option<String>,
  /// Falls back to the version in package.json
  pub version: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetEntry {
  pub name: Option<String>,
  pub entry: PathBuf,
  /// Output directory of a per-module target
  pub dir: Option<String>,
  /// Output file of a single-file target
  pub file: Option<String>,
  pub preserve_modules: Option<bool>,
  #[serde(default)]
  pub format: OutputFormat,
  #[serde(default)]
  pub minify: bool,
  #[serde(default)]
  pub sourcemap: bool,
  pub stages: Option<Vec<StageRef>>,
  /// Merged over the top-level `env`
  #[serde(default)]
  pub env: IndexMap<String, String>,
  pub version_tag: Option<String>,
  pub module_side_effects: Option<bool>,
  pub entry_file_names: Option<String>,
}
