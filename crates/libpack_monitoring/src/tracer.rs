//! This module configures `tracing_subscriber` to write to a rolling log file and, optionally,
//! to standard output.
use std::path::PathBuf;

use anyhow::anyhow;
use serde::Deserialize;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::from_env::{optional_var, FromEnvError};

pub const TRACING_MODE_VAR: &str = "LIBPACK_TRACING_MODE";

/// Overrides the directory of the log file
pub const TRACING_DIR_VAR: &str = "LIBPACK_TRACING_DIR";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum TracerMode {
  /// Output the Tracer logs to Stdout
  Stdout,
  /// Only write the log file, in a custom directory
  File { directory: PathBuf },
}

impl TracerMode {
  pub fn from_env() -> Result<Vec<Self>, FromEnvError> {
    let Some(mode) = optional_var(TRACING_MODE_VAR) else {
      return Ok(vec![]);
    };

    let mut tracer_modes = vec![];
    for mode in mode.split(',').map(|s| s.trim()) {
      let parsed = match mode {
        "stdout" => Self::stdout(),
        "file" => Self::file(default_log_directory()),
        value => {
          return Err(FromEnvError::InvalidKey(
            String::from(TRACING_MODE_VAR),
            anyhow!("Invalid value: {}", value),
          ))
        }
      };

      if !tracer_modes.contains(&parsed) {
        tracer_modes.push(parsed);
      }
    }

    Ok(tracer_modes)
  }

  /// Default STDOUT configuration
  pub fn stdout() -> Self {
    Self::Stdout
  }

  pub fn file(directory: PathBuf) -> Self {
    Self::File { directory }
  }
}

fn default_log_directory() -> PathBuf {
  optional_var(TRACING_DIR_VAR)
    .map(PathBuf::from)
    .unwrap_or_else(|| std::env::temp_dir().join("libpack_trace"))
}

pub struct Tracer {
  #[allow(unused)]
  worker_guards: Vec<WorkerGuard>,
}

impl Tracer {
  pub fn new(options: &[TracerMode]) -> anyhow::Result<Self> {
    let mut worker_guards = vec![];

    // We will always write tracing to the log file
    let directory = options
      .iter()
      .find_map(|mode| match mode {
        TracerMode::File { directory } => Some(directory.clone()),
        _ => None,
      })
      .unwrap_or_else(default_log_directory);

    let file_appender = tracing_appender::rolling::Builder::new()
      .rotation(tracing_appender::rolling::Rotation::HOURLY)
      .max_log_files(4)
      .filename_prefix("libpack-tracing")
      .build(&directory)
      .map_err(|err| anyhow!(err))?;
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);

    let layer = tracing_subscriber::fmt::layer()
      .with_writer(non_blocking)
      .with_ansi(false)
      .with_span_events(FmtSpan::CLOSE)
      .with_filter(EnvFilter::from_default_env());

    worker_guards.push(worker_guard);

    let stdout_layer = if options.contains(&TracerMode::Stdout) {
      let (non_blocking, worker_guard) = tracing_appender::non_blocking(std::io::stdout());
      let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());

      worker_guards.push(worker_guard);

      Some(stdout_layer)
    } else {
      None
    };

    let subscriber = Registry::default().with(layer).with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(Self { worker_guards })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

  #[test]
  fn test_tracing_options_sets_to_none_if_no_mode_is_set() {
    let _guard = TEST_LOCK.lock();
    std::env::remove_var(TRACING_MODE_VAR);
    let options = TracerMode::from_env().unwrap();
    assert!(options.is_empty());
  }

  #[test]
  fn test_tracing_options_sets_to_stdout() {
    let _guard = TEST_LOCK.lock();
    std::env::set_var(TRACING_MODE_VAR, "stdout, stdout");
    let options = TracerMode::from_env().unwrap();
    assert_eq!(options, vec![TracerMode::stdout()]);
  }

  #[test]
  fn test_file_mode_reads_the_directory_from_the_environment() {
    let _guard = TEST_LOCK.lock();
    std::env::set_var(TRACING_MODE_VAR, "file");
    std::env::set_var(TRACING_DIR_VAR, "/var/log/libpack");
    let options = TracerMode::from_env().unwrap();
    std::env::remove_var(TRACING_DIR_VAR);
    std::env::remove_var(TRACING_MODE_VAR);

    assert_eq!(options, vec![TracerMode::file(PathBuf::from("/var/log/libpack"))]);
  }

  #[test]
  fn test_tracing_options_rejects_unknown_modes() {
    let _guard = TEST_LOCK.lock();
    std::env::set_var(TRACING_MODE_VAR, "chrome");
    assert!(TracerMode::from_env().is_err());
    std::env::remove_var(TRACING_MODE_VAR);
  }
}
