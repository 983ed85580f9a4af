use std::path::Path;
use std::path::PathBuf;

use derive_builder::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use libpack_filesystem::FileSystem;

use crate::error::ConfigError;
use crate::stage::names;

/// Whether a target keeps the module structure of the source tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputShape {
  /// One output file per statically reachable module, written under an output directory
  #[default]
  PerModule,
  /// The whole module graph bundled into one output file
  SingleFile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
  #[default]
  EsModule,
  CommonJs,
}

/// A stage named by a target, with its stage specific options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "StageRefInput")]
pub struct StageRef {
  pub name: String,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub options: serde_json::Value,
}

impl StageRef {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      options: serde_json::Value::Null,
    }
  }

  pub fn with_options(name: &str, options: serde_json::Value) -> Self {
    Self {
      name: name.to_string(),
      options,
    }
  }
}

/// Stages can be written either as a bare name or as `{ name, options }`
#[derive(Deserialize)]
#[serde(untagged)]
enum StageRefInput {
  Name(String),
  Full {
    name: String,
    #[serde(default)]
    options: serde_json::Value,
  },
}

impl From<StageRefInput> for StageRef {
  fn from(input: StageRefInput) -> Self {
    match input {
      StageRefInput::Name(name) => StageRef::new(&name),
      StageRefInput::Full { name, options } => StageRef::with_options(&name, options),
    }
  }
}

/// Declares one build: where it starts, what it runs and where the artifacts go
#[derive(Clone, Debug, PartialEq, Builder, Deserialize, Serialize)]
#[builder(default, setter(into))]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
  /// Identifies the target in logs and reports
  pub name: String,

  /// The entry module of the library
  pub entry: PathBuf,

  /// An output directory for per-module targets, an output file for single-file targets
  pub output: PathBuf,

  pub shape: OutputShape,

  pub format: OutputFormat,

  pub minify: bool,

  pub sourcemap: bool,

  /// The stages to run, in this exact order
  pub stages: Vec<StageRef>,

  /// Expressions to replace, mapped to the source text of their replacement
  pub env: IndexMap<String, String>,

  /// Template of the leading comment, `{version}` and `{name}` are substituted
  #[builder(setter(into, strip_option))]
  pub version_tag: Option<String>,

  /// When false, modules are assumed to have no side effects on import
  pub module_side_effects: bool,

  /// Per-module file name template, `[name]` is the module path without extension
  pub entry_file_names: String,
}

impl Default for TargetDescriptor {
  fn default() -> Self {
    Self {
      name: String::from("default"),
      entry: PathBuf::default(),
      output: PathBuf::default(),
      shape: OutputShape::PerModule,
      format: OutputFormat::EsModule,
      minify: false,
      sourcemap: false,
      stages: Vec::new(),
      env: IndexMap::new(),
      version_tag: None,
      module_side_effects: false,
      entry_file_names: String::from("[name].js"),
    }
  }
}

const SCRIPT_EXTENSIONS: [&str; 3] = ["js", "mjs", "cjs"];

fn has_script_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

impl TargetDescriptor {
  /// The chain a target runs when it does not list its stages
  pub fn default_stages(format: OutputFormat, minify: bool) -> Vec<StageRef> {
    let mut stages = vec![
      StageRef::new(names::REPLACE),
      StageRef::new(names::TYPESCRIPT),
      StageRef::new(names::RESOLVE),
      StageRef::new(names::DOWNLEVEL),
    ];

    if format == OutputFormat::CommonJs {
      stages.push(StageRef::new(names::COMMONJS));
    }

    stages.push(StageRef::new(names::VERSION_TAG));
    stages.push(StageRef::new(if minify {
      names::MINIFY
    } else {
      names::FORMAT
    }));
    stages.push(StageRef::new(names::OPTIMIZE));
    stages
  }

  pub fn has_stage(&self, name: &str) -> bool {
    self.stages.iter().any(|stage| stage.name == name)
  }

  /// True if the single-file output already names a minified file, like `lib.min.js`
  pub fn has_minified_file_name(&self) -> bool {
    self
      .output
      .file_name()
      .and_then(|name| name.to_str())
      .is_some_and(|name| name.contains(".min."))
  }

  /// Single-file targets that minify also write the unminified build, the minified one
  /// goes to `<stem>.min<ext>`
  pub fn minified_sibling(&self) -> Option<PathBuf> {
    if self.shape != OutputShape::SingleFile || !self.minify || self.has_minified_file_name() {
      return None;
    }

    let stem = self.output.file_stem()?.to_string_lossy();
    let file_name = match self.output.extension() {
      Some(ext) => format!("{}.min.{}", stem, ext.to_string_lossy()),
      None => format!("{}.min", stem),
    };

    Some(self.output.with_file_name(file_name))
  }

  /// Every file or directory the target writes
  pub fn output_paths(&self) -> Vec<PathBuf> {
    let mut paths = vec![self.output.clone()];
    paths.extend(self.minified_sibling());
    paths
  }

  fn invalid(&self, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidTarget {
      target: self.name.clone(),
      message: message.into(),
    }
  }

  /// Check the descriptor for errors that would make the build meaningless
  pub fn validate(&self, fs: &dyn FileSystem, known_stages: &[&str]) -> Result<(), ConfigError> {
    if !fs.is_file(&self.entry) {
      return Err(ConfigError::MissingEntry {
        target: self.name.clone(),
        entry: self.entry.clone(),
      });
    }

    match self.shape {
      OutputShape::PerModule => {
        if self.output.as_os_str().is_empty() || has_script_extension(&self.output) {
          return Err(self.invalid("per-module output needs an output directory"));
        }

        if !self.entry_file_names.contains("[name]") {
          return Err(self.invalid("entryFileNames must contain [name]"));
        }
      }
      OutputShape::SingleFile => {
        if !has_script_extension(&self.output) {
          return Err(self.invalid("single-file output needs an output file ending in .js, .mjs or .cjs"));
        }
      }
    }

    if self.stages.is_empty() {
      return Err(self.invalid("no stages declared"));
    }

    if let Some(stage) = self
      .stages
      .iter()
      .find(|stage| !known_stages.contains(&stage.name.as_str()))
    {
      return Err(ConfigError::UnknownStage {
        target: self.name.clone(),
        stage: stage.name.clone(),
      });
    }

    match (self.format, self.has_stage(names::COMMONJS)) {
      (OutputFormat::CommonJs, false) => {
        return Err(self.invalid("commonjs format requires the commonjs stage"));
      }
      (OutputFormat::EsModule, true) => {
        return Err(self.invalid("the commonjs stage can not run in an esmodule target"));
      }
      _ => {}
    }

    match (self.minify, self.has_stage(names::MINIFY)) {
      (true, false) => Err(self.invalid("minify is set but the minify stage is not declared")),
      (false, true) => Err(self.invalid("the minify stage is declared but minify is not set")),
      _ => Ok(()),
    }
  }
}
