//! This module configures tracing for the libpack binary.
//!
//! Tracing is always written to a rolling log file, standard output is opt-in.
//!
//! Tracing should only be initialized once.
use std::sync::Mutex;

pub use tracer::{TracerMode, TRACING_DIR_VAR, TRACING_MODE_VAR};

mod from_env;
mod tracer;

pub use from_env::FromEnvError;

pub static MONITORING_GUARD: Mutex<Option<MonitoringGuard>> = Mutex::new(None);

pub struct MonitoringGuard {
  #[allow(unused)]
  tracer: tracer::Tracer,
}

#[derive(Debug, Default)]
pub struct MonitoringOptions {
  pub tracing_options: Vec<TracerMode>,
}

impl MonitoringOptions {
  pub fn from_env() -> Result<Self, FromEnvError> {
    Ok(Self {
      tracing_options: TracerMode::from_env()?,
    })
  }
}

pub fn initialize_monitoring(options: MonitoringOptions) -> anyhow::Result<()> {
  let mut global = MONITORING_GUARD
    .lock()
    .map_err(|_| anyhow::anyhow!("Monitoring lock is poisoned"))?;

  if global.is_some() {
    tracing::warn!("Monitoring is getting set-up twice, this will no-op");
    return Ok(());
  }

  let tracer = tracer::Tracer::new(&options.tracing_options)?;
  *global = Some(MonitoringGuard { tracer });

  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_initialize_monitoring_multiple_times() {
    let directory = std::env::temp_dir().join("libpack_trace_test");
    initialize_monitoring(MonitoringOptions {
      tracing_options: vec![TracerMode::file(directory.clone())],
    })
    .unwrap();

    initialize_monitoring(MonitoringOptions {
      tracing_options: vec![TracerMode::file(directory)],
    })
    .unwrap();
  }
}
