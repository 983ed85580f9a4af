use libpack_core::cache::CacheRef;
use libpack_core::error::StageError;
use libpack_core::hash::hash_parts;
use libpack_core::stage::{Stage, StageContext, StageOutput};

use crate::cache_stats::{CacheCounters, CacheStats};

/// Looks up stage outputs before running a stage.
///
/// Entries are keyed by the stage input, the module identity, the stage name and the stage
/// configuration hash. Values are the stage's own output and map effect, never the composed
/// map, so a hit is valid whatever ran before the stage.
#[derive(Default)]
pub struct StageCache {
  cache: Option<CacheRef>,
  counters: CacheCounters,
}

impl std::fmt::Debug for StageCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageCache")
      .field("enabled", &self.cache.is_some())
      .field("counters", &self.counters)
      .finish()
  }
}

impl StageCache {
  pub fn new(cache: CacheRef) -> Self {
    Self {
      cache: Some(cache),
      counters: CacheCounters::default(),
    }
  }

  /// Every stage runs, nothing is stored
  pub fn disabled() -> Self {
    Self::default()
  }

  pub fn stats(&self) -> CacheStats {
    self.counters.snapshot()
  }

  pub fn key(stage: &dyn Stage, ctx: &StageContext<'_>, code: &str) -> String {
    let file = ctx.file_path.to_string_lossy();
    let specifiers = ctx
      .specifiers
      .iter()
      .map(|(from, to)| format!("{}={}", from, to))
      .collect::<Vec<_>>()
      .join("\n");
    let config_hash = format!("{:016x}", stage.config_hash(ctx.target, ctx.library));

    let hash = hash_parts([
      code,
      file.as_ref(),
      specifiers.as_str(),
      stage.name(),
      config_hash.as_str(),
    ]);

    format!("{}/{:016x}", stage.name(), hash)
  }

  #[tracing::instrument(level = "trace", skip_all, fields(stage = stage.name()))]
  pub fn run(
    &self,
    stage: &dyn Stage,
    ctx: &StageContext<'_>,
    code: &str,
  ) -> Result<StageOutput, StageError> {
    let Some(cache) = &self.cache else {
      return stage.transform(ctx, code);
    };

    let key = Self::key(stage, ctx, code);
    match cache.get_blob(&key) {
      Ok(Some(blob)) => match serde_json::from_slice::<StageOutput>(&blob) {
        Ok(output) => {
          self.counters.hit();
          tracing::trace!("Cache hit for {}", key);
          return Ok(output);
        }
        Err(error) => {
          self.counters.error();
          tracing::warn!("Ignoring corrupt cache entry {}: {}", key, error);
        }
      },
      Ok(None) => {}
      Err(error) => {
        self.counters.error();
        tracing::warn!("Failed to read cache entry {}: {}", key, error);
      }
    }

    self.counters.miss();
    let output = stage.transform(ctx, code)?;

    let stored = serde_json::to_vec(&output)
      .map_err(anyhow::Error::from)
      .and_then(|blob| cache.set_blob(&key, &blob));

    if let Err(error) = stored {
      self.counters.error();
      tracing::warn!("Failed to write cache entry {}: {}", key, error);
    }

    Ok(output)
  }
}
