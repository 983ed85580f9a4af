use swc_core::common::util::take::Take;
use swc_core::ecma::ast::Program;
use swc_core::ecma::minifier::optimize;
use swc_core::ecma::minifier::option::{ExtraOptions, MangleOptions, MinifyOptions};

use libpack_core::error::StageError;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::runner::{into_module, run_with_transformation, EmitOptions};

/// Mangles local names and prints without whitespace or comments.
///
/// Top-level and exported names are kept, and so is the version tag banner.
#[derive(Debug, Default)]
pub struct MinifyStage;

impl Stage for MinifyStage {
  fn name(&self) -> &'static str {
    names::MINIFY
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
      EmitOptions {
        minify: true,
        keep_comments: false,
        ..EmitOptions::default()
      },
      |run, module| {
        let program = optimize(
          Program::Module(module.take()),
          run.source_map.clone(),
          None,
          None,
          &MinifyOptions {
            rename: false,
            compress: None,
            mangle: Some(MangleOptions::default()),
            wrap: false,
            enclose: false,
          },
          &ExtraOptions {
            unresolved_mark: run.unresolved_mark,
            top_level_mark: run.global_mark,
            mangle_name_cache: None,
          },
        );

        *module = into_module(program);
        Ok(())
      },
    )
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use pretty_assertions::assert_eq;

  use crate::test_utils::TestContext;

  use super::*;

  #[test]
  fn removes_whitespace_and_keeps_exports() {
    let input = "export const VERSION = \"1.0.0\";\n";
    let code = TestContext::default().code(&MinifyStage, input);

    assert!(code.contains("export const VERSION=\"1.0.0\""));
    assert!(code.len() < input.len());
  }

  #[test]
  fn mangles_local_names() {
    let code = TestContext::default().code(
      &MinifyStage,
      indoc! {r#"
        export function greet(personName) {
          // say hello
          const greeting = "hello " + personName;
          return greeting;
        }
      "#},
    );

    assert!(code.contains("export function greet("));
    assert!(!code.contains("personName"));
    assert!(!code.contains("greeting"));
    assert!(!code.contains("say hello"));
  }

  #[test]
  fn keeps_the_version_tag() {
    let code = TestContext::default().code(
      &MinifyStage,
      "/* mylib @1.0.0 */\nexport const VERSION = \"1.0.0\";\n",
    );

    assert_eq!(code.lines().next(), Some("/* mylib @1.0.0 */"));
  }
}
