use std::time::Instant;

use rayon::prelude::*;

use libpack_config::BuildConfig;
use libpack_core::cache::CacheRef;
use libpack_core::error::{ConfigError, TargetError};
use libpack_core::types::TargetDescriptor;
use libpack_filesystem::FileSystemRef;
use libpack_stages::{StageRc, StageRegistry};

use crate::cache_stats::CacheStats;
use crate::emitter::Emitter;
use crate::pipeline::{Pipeline, TargetReport, TargetState};
use crate::stage_cache::StageCache;

/// Outcome of every target of a run, in declaration order
#[derive(Debug)]
pub struct BuildReport {
  pub targets: Vec<TargetReport>,
  pub cache: CacheStats,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.targets.iter().all(TargetReport::is_done)
  }

  pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|target| !target.is_done())
  }
}

/// Builds every target of a configuration, in parallel.
///
/// Targets share nothing but the stage cache: a failing target never stops the others.
#[derive(Debug)]
pub struct Libpack {
  pub fs: FileSystemRef,
  pub registry: StageRegistry,
  pub cache: StageCache,
}

impl Libpack {
  pub fn new(fs: FileSystemRef, cache: Option<CacheRef>) -> Self {
    Self {
      fs,
      registry: StageRegistry::default(),
      cache: cache.map(StageCache::new).unwrap_or_default(),
    }
  }

  pub fn with_registry(mut self, registry: StageRegistry) -> Self {
    self.registry = registry;
    self
  }

  /// Stages are instantiated for every target before any of them starts, so that invalid
  /// stage options fail the run instead of one target
  #[tracing::instrument(level = "info", skip_all, fields(targets = config.targets.len()))]
  pub fn build(&self, config: &BuildConfig) -> Result<BuildReport, ConfigError> {
    let pipelines = config
      .targets
      .iter()
      .map(|target| {
        let stages = self.registry.create_all(&target.stages, &target.name)?;
        Ok((target, stages))
      })
      .collect::<Result<Vec<_>, ConfigError>>()?;

    let targets = pipelines
      .par_iter()
      .map(|(target, stages)| self.build_target(config, target, stages))
      .collect::<Vec<_>>();

    let report = BuildReport {
      targets,
      cache: self.cache.stats(),
    };
    report.cache.log();

    Ok(report)
  }

  fn build_target(
    &self,
    config: &BuildConfig,
    target: &TargetDescriptor,
    stages: &[StageRc],
  ) -> TargetReport {
    let start = Instant::now();
    let mut report = TargetReport::new(&target.name);

    let pipeline = Pipeline {
      fs: &*self.fs,
      project_root: &config.project_root,
      library: &config.library,
      target,
      stages,
      cache: &self.cache,
    };

    let result = pipeline.run(&mut report).and_then(|artifacts| {
      report.transition(TargetState::Emitting);
      Emitter::new(&*self.fs)
        .emit(&artifacts)
        .map_err(TargetError::from)
    });

    match result {
      Ok(outputs) => {
        report.outputs = outputs;
        report.transition(TargetState::Done);
      }
      Err(error) => report.fail(error),
    }

    report.duration = start.elapsed();
    tracing::info!(
      target = %target.name,
      state = %report.state,
      "Finished in {:?}",
      report.duration
    );

    report
  }
}

#[cfg(test)]
mod tests {
  use std::path::{Path, PathBuf};
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use serde_json::json;

  use libpack_core::cache::InMemoryCache;
  use libpack_core::types::{LibraryInfo, OutputFormat, OutputShape, StageRef, TargetDescriptorBuilder};
  use libpack_filesystem::in_memory_file_system::InMemoryFileSystem;
  use libpack_filesystem::FileSystem;

  use super::*;

  fn target(name: &str, entry: &str, output: &str) -> TargetDescriptor {
    TargetDescriptorBuilder::default()
      .name(name)
      .entry(entry)
      .output(output)
      .shape(OutputShape::PerModule)
      .stages(TargetDescriptor::default_stages(OutputFormat::EsModule, false))
      .entry_file_names("[name].js")
      .build()
      .unwrap()
  }

  fn config(targets: Vec<TargetDescriptor>) -> BuildConfig {
    BuildConfig {
      project_root: PathBuf::from("/repo"),
      library: LibraryInfo::new("mylib", "1.0.0"),
      targets,
    }
  }

  fn fs() -> Arc<InMemoryFileSystem> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write(
      Path::new("/repo/src/index.ts"),
      b"export const VERSION = \"1.0.0\";\n",
    )
    .unwrap();
    fs.write(Path::new("/repo/src/broken.ts"), b"export const = ;\n")
      .unwrap();
    fs
  }

  #[test]
  fn failing_targets_do_not_stop_the_others() {
    let fs = fs();
    let libpack = Libpack::new(fs.clone(), None);

    let report = libpack
      .build(&config(vec![
        target("broken", "/repo/src/broken.ts", "/repo/dist/broken"),
        target("esm", "/repo/src/index.ts", "/repo/dist/esm"),
      ]))
      .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.targets[0].state, TargetState::Failed);
    assert!(matches!(report.targets[0].error, Some(TargetError::Stage(_))));
    assert_eq!(report.targets[1].state, TargetState::Done);
    assert_eq!(report.targets[1].outputs, vec![PathBuf::from("/repo/dist/esm/index.js")]);
    assert!(fs.is_file(Path::new("/repo/dist/esm/index.js")));
    assert!(!fs.is_file(Path::new("/repo/dist/broken/broken.js")));
  }

  #[test]
  fn invalid_stage_options_fail_the_run() {
    let mut esm = target("esm", "/repo/src/index.ts", "/repo/dist/esm");
    esm.stages.push(StageRef::with_options("format", json!({ "tabWidth": "wide" })));

    let error = Libpack::new(fs(), None)
      .build(&config(vec![esm]))
      .unwrap_err();

    assert!(matches!(error, ConfigError::InvalidTarget { .. }));
  }

  #[test]
  fn cached_runs_write_identical_artifacts() {
    let fs = fs();
    let libpack = Libpack::new(fs.clone(), Some(Arc::new(InMemoryCache::default())));
    let config = config(vec![target("esm", "/repo/src/index.ts", "/repo/dist/esm")]);

    libpack.build(&config).unwrap();
    let first = fs.read_to_string(Path::new("/repo/dist/esm/index.js")).unwrap();

    let report = libpack.build(&config).unwrap();
    let second = fs.read_to_string(Path::new("/repo/dist/esm/index.js")).unwrap();

    assert_eq!(first, second);
    assert!(report.cache.hits > 0);
  }
}
