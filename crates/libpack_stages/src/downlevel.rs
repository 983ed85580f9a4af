use swc_core::common::util::take::Take;
use swc_core::ecma::ast::{Pass, Program};
use swc_core::ecma::preset_env::{preset_env, Config, Targets, Version, Versions};
use swc_core::ecma::transforms::base::helpers::{inject_helpers, Helpers, HELPERS};
use swc_core::ecma::transforms::base::assumptions::Assumptions;

use libpack_core::error::StageError;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::runner::{into_module, run_with_transformation, EmitOptions};

fn version(major: u32, minor: u32) -> Option<Version> {
  Some(Version {
    major,
    minor,
    patch: 0,
  })
}

/// The first release of every engine that loads `<script type="module">`.
///
/// Safari starts at 11, whose block scoping is sound, so `const` and `let` survive.
pub fn esmodule_versions() -> Versions {
  Versions {
    chrome: version(61, 0),
    edge: version(16, 0),
    firefox: version(60, 0),
    safari: version(11, 0),
    ios: version(11, 0),
    opera: version(48, 0),
    samsung: version(8, 2),
    ..Default::default()
  }
}

/// Lowers every syntax feature newer than the ES module baseline, in loose mode.
///
/// Helpers the lowered code needs are inlined at the top of the module.
#[derive(Debug, Default)]
pub struct DownlevelStage;

impl Stage for DownlevelStage {
  fn name(&self) -> &'static str {
    names::DOWNLEVEL
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
        let config = Config {
          targets: Some(Targets::Versions(esmodule_versions())),
          loose: true,
          bugfixes: true,
          ..Default::default()
        };

        let mut assumptions = Assumptions::default();
        assumptions.no_document_all = true;

        let mut program = Program::Module(module.take());
        HELPERS.set(&Helpers::new(false), || {
          preset_env(
            run.unresolved_mark,
            Some(run.comments.clone()),
            config,
            assumptions,
            &mut Default::default(),
          )
          .process(&mut program);

          inject_helpers(run.unresolved_mark).process(&mut program);
        });

        *module = into_module(program);
        Ok(())
      },
    )
  }
}
