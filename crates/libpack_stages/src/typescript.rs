use swc_core::common::util::take::Take;
use swc_core::ecma::ast::{Pass, Program};
use swc_core::ecma::transforms::typescript::strip;

use libpack_core::error::StageError;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::runner::{into_module, run_with_transformation, EmitOptions};

/// Compiles TypeScript to JavaScript by stripping type syntax
#[derive(Debug, Default)]
pub struct TypeScriptStage;

impl Stage for TypeScriptStage {
  fn name(&self) -> &'static str {
    names::TYPESCRIPT
  }

  fn config_hash(&self, _target: &TargetDescriptor, _library: &LibraryInfo) -> u64 {
    0
  }

  #[tracing::instrument(level = "trace", skip_all, fields(file = %ctx.file_path.display()))]
  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    run_with_transformation(
      self.name(),
      ctx,
      code,
      EmitOptions::default(),
      |run, module| {
        let mut program = Program::Module(module.take());
        strip(run.unresolved_mark, run.global_mark).process(&mut program);

        *module = into_module(program);
        Ok(())
      },
    )
  }
}
