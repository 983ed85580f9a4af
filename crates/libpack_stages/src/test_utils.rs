use std::collections::BTreeMap;
use std::path::PathBuf;

use libpack_core::stage::{MapEffect, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

/// Owns everything a `StageContext` borrows
pub struct TestContext {
  pub project_root: PathBuf,
  pub file_path: PathBuf,
  pub target: TargetDescriptor,
  pub library: LibraryInfo,
  pub specifiers: BTreeMap<String, String>,
}

impl Default for TestContext {
  fn default() -> Self {
    Self {
      project_root: PathBuf::from("/repo"),
      file_path: PathBuf::from("/repo/src/index.ts"),
      target: TargetDescriptor::default(),
      library: LibraryInfo::new("mylib", "1.0.0"),
      specifiers: BTreeMap::new(),
    }
  }
}

impl TestContext {
  pub fn ctx(&self) -> StageContext<'_> {
    StageContext {
      project_root: &self.project_root,
      file_path: &self.file_path,
      target: &self.target,
      library: &self.library,
      specifiers: &self.specifiers,
    }
  }

  pub fn run(&self, stage: &dyn Stage, code: &str) -> StageOutput {
    stage.transform(&self.ctx(), code).unwrap()
  }

  /// Run the stage and return only the code
  pub fn code(&self, stage: &dyn Stage, code: &str) -> String {
    self.run(stage, code).code
  }
}

pub fn remapped(output: &StageOutput) -> &libpack_sourcemap::SourceMap {
  match &output.map {
    MapEffect::Remapped { map } => map,
    other => panic!("Expected a remapped output, got {:?}", other),
  }
}
