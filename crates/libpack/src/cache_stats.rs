//! Statistics of the stage cache, reported once per run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every target of a run
#[derive(Debug, Default)]
pub struct CacheCounters {
  hits: AtomicU64,
  misses: AtomicU64,
  errors: AtomicU64,
}

impl CacheCounters {
  pub fn hit(&self) {
    self.hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  /// An entry that could not be read or written
  pub fn error(&self) {
    self.errors.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> CacheStats {
    CacheStats {
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub errors: u64,
}

impl CacheStats {
  pub fn log(&self) {
    tracing::info!("Stage cache stats: {:#?}", self);
  }
}
