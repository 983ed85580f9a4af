use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use libpack_core::error::ConfigError;
use libpack_core::stage::{names, Stage};
use libpack_core::types::StageRef;

use crate::commonjs::CommonJsStage;
use crate::downlevel::DownlevelStage;
use crate::format::{FormatOptions, FormatStage};
use crate::minify::MinifyStage;
use crate::optimize::OptimizeStage;
use crate::replace::ReplaceStage;
use crate::resolve::ResolveStage;
use crate::typescript::TypeScriptStage;
use crate::version_tag::VersionTagStage;

pub type StageRc = Arc<dyn Stage>;

/// Builds a stage from the options declared next to its name
pub type StageFactory = fn(&Value) -> Result<StageRc, String>;

/// Maps stage names to the stages that implement them
#[derive(Clone)]
pub struct StageRegistry {
  factories: IndexMap<&'static str, StageFactory>,
}

impl std::fmt::Debug for StageRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageRegistry")
      .field("stages", &self.names())
      .finish()
  }
}

fn without_options<S: Stage + Default + 'static>(options: &Value) -> Result<StageRc, String> {
  match options {
    Value::Null => Ok(Arc::new(S::default())),
    Value::Object(map) if map.is_empty() => Ok(Arc::new(S::default())),
    _ => Err(String::from("this stage takes no options")),
  }
}

fn format_stage(options: &Value) -> Result<StageRc, String> {
  Ok(Arc::new(FormatStage::new(FormatOptions::from_value(options)?)))
}

impl Default for StageRegistry {
  fn default() -> Self {
    let mut registry = Self::empty();
    registry.register(names::REPLACE, without_options::<ReplaceStage>);
    registry.register(names::TYPESCRIPT, without_options::<TypeScriptStage>);
    registry.register(names::RESOLVE, without_options::<ResolveStage>);
    registry.register(names::DOWNLEVEL, without_options::<DownlevelStage>);
    registry.register(names::COMMONJS, without_options::<CommonJsStage>);
    registry.register(names::VERSION_TAG, without_options::<VersionTagStage>);
    registry.register(names::FORMAT, format_stage);
    registry.register(names::MINIFY, without_options::<MinifyStage>);
    registry.register(names::OPTIMIZE, without_options::<OptimizeStage>);
    registry
  }
}

impl StageRegistry {
  pub fn empty() -> Self {
    Self {
      factories: IndexMap::new(),
    }
  }

  pub fn register(&mut self, name: &'static str, factory: StageFactory) {
    self.factories.insert(name, factory);
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.factories.keys().copied().collect()
  }

  pub fn create(&self, stage: &StageRef, target: &str) -> Result<StageRc, ConfigError> {
    let factory = self
      .factories
      .get(stage.name.as_str())
      .ok_or_else(|| ConfigError::UnknownStage {
        target: target.to_string(),
        stage: stage.name.clone(),
      })?;

    factory(&stage.options).map_err(|message| ConfigError::InvalidTarget {
      target: target.to_string(),
      message: format!("Invalid options for stage {}: {}", stage.name, message),
    })
  }

  /// Instantiate every stage of a target, in declaration order
  pub fn create_all(&self, stages: &[StageRef], target: &str) -> Result<Vec<StageRc>, ConfigError> {
    stages
      .iter()
      .map(|stage| self.create(stage, target))
      .collect()
  }
}
