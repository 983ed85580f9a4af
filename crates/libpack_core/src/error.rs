use std::path::PathBuf;

use thiserror::Error;

/// A build request that can not run at all. Raised before any target starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {message}")]
  Unreadable { path: PathBuf, message: String },

  #[error("Invalid config {path}: {message}")]
  Malformed { path: PathBuf, message: String },

  #[error("Target \"{target}\": {message}")]
  InvalidTarget { target: String, message: String },

  #[error("Target \"{target}\" entry {entry} does not exist")]
  MissingEntry { target: String, entry: PathBuf },

  #[error("Target \"{target}\" uses unknown stage \"{stage}\"")]
  UnknownStage { target: String, stage: String },

  #[error("Targets \"{first}\" and \"{second}\" both write {output}")]
  DuplicateOutput {
    first: String,
    second: String,
    output: PathBuf,
  },

  #[error("Target \"{inner_target}\" writes {inner}, inside {outer} of target \"{outer_target}\"")]
  NestedOutput {
    outer_target: String,
    outer: PathBuf,
    inner_target: String,
    inner: PathBuf,
  },

  #[error("Unknown target \"{0}\"")]
  UnknownTarget(String),
}

/// An import that can not be found in the source tree
#[derive(Debug, Error, PartialEq)]
#[error("Failed to resolve '{specifier}' from {importer}")]
pub struct ResolutionError {
  pub importer: PathBuf,
  pub specifier: String,
}

/// A transform stage that failed for one input
#[derive(Debug, Error, PartialEq)]
#[error("[{stage}] {}: {message}", location(.file, .line, .column))]
pub struct StageError {
  pub stage: String,
  pub file: PathBuf,
  pub message: String,
  /// One based
  pub line: Option<u32>,
  /// One based
  pub column: Option<u32>,
}

fn location(file: &std::path::Path, line: &Option<u32>, column: &Option<u32>) -> String {
  match (line, column) {
    (Some(line), Some(column)) => format!("{}:{}:{}", file.display(), line, column),
    (Some(line), None) => format!("{}:{}", file.display(), line),
    _ => file.display().to_string(),
  }
}

impl StageError {
  pub fn new(stage: &str, file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
    Self {
      stage: stage.to_string(),
      file: file.into(),
      message: message.into(),
      line: None,
      column: None,
    }
  }

  pub fn at(mut self, line: u32, column: u32) -> Self {
    self.line = Some(line);
    self.column = Some(column);
    self
  }
}

/// An artifact that could not be written
#[derive(Debug, Error, PartialEq)]
#[error("Failed to write {path}: {message}")]
pub struct EmitError {
  pub path: PathBuf,
  pub message: String,
}

/// Everything that fails a single target without affecting the others
#[derive(Debug, Error, PartialEq)]
pub enum TargetError {
  #[error(transparent)]
  Resolution(#[from] ResolutionError),
  #[error(transparent)]
  Stage(#[from] StageError),
  #[error(transparent)]
  Emit(#[from] EmitError),
}
