use libpack_core::error::StageError;
use libpack_core::hash::hash_parts;
use libpack_core::stage::{names, MapEffect, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

/// Used when neither the target nor the build configuration declare a template
pub const DEFAULT_VERSION_TAG: &str = "<LIBRARY_NAME> @{version}";

/// Prepends a `/* <tag> */` comment line naming the library and its version
#[derive(Debug, Default)]
pub struct VersionTagStage;

impl VersionTagStage {
  pub fn render(target: &TargetDescriptor, library: &LibraryInfo) -> String {
    let template = target.version_tag.as_deref().unwrap_or(DEFAULT_VERSION_TAG);
    format!("/* {} */", library.substitute(template))
  }
}

impl Stage for VersionTagStage {
  fn name(&self) -> &'static str {
    names::VERSION_TAG
  }

  fn config_hash(&self, target: &TargetDescriptor, library: &LibraryInfo) -> u64 {
    hash_parts([Self::render(target, library).as_str()])
  }

  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    let tag = Self::render(ctx.target, ctx.library);
    if tag.contains('\n') || tag[2..tag.len() - 2].contains("*/") {
      return Err(StageError::new(
        self.name(),
        ctx.file_path,
        format!("Version tag must be a single line comment body: {}", tag),
      ));
    }

    let first_line = code.lines().next().unwrap_or_default();
    if first_line.trim_end() == tag {
      return Ok(StageOutput::unchanged(code));
    }

    tracing::trace!(tag = %tag, "Tagging {}", ctx.file_path.display());

    Ok(StageOutput {
      code: format!("{}\n{}", tag, code),
      map: MapEffect::Shifted { lines: 1 },
    })
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::test_utils::TestContext;

  use super::*;

  #[test]
  fn prepends_the_default_tag() {
    let output = TestContext::default().run(&VersionTagStage, "export const a = 1;\n");

    assert_eq!(
      output,
      StageOutput {
        code: String::from("/* mylib @1.0.0 */\nexport const a = 1;\n"),
        map: MapEffect::Shifted { lines: 1 },
      }
    );
  }

  #[test]
  fn uses_the_target_template() {
    let mut context = TestContext::default();
    context.target.version_tag = Some(String::from("{name} v{version} (MIT)"));

    assert_eq!(
      context.code(&VersionTagStage, "run();\n"),
      "/* mylib v1.0.0 (MIT) */\nrun();\n"
    );
  }

  #[test]
  fn leaves_tagged_code_unchanged() {
    let output = TestContext::default().run(&VersionTagStage, "/* mylib @1.0.0 */\nrun();\n");

    assert_eq!(output, StageOutput::unchanged("/* mylib @1.0.0 */\nrun();\n"));
  }

  #[test]
  fn returns_error_for_tags_closing_the_comment() {
    let mut context = TestContext::default();
    context.target.version_tag = Some(String::from("*/ evil() /*"));

    let error = VersionTagStage.transform(&context.ctx(), "run();").unwrap_err();

    assert_eq!(error.stage, names::VERSION_TAG);
  }

  #[test]
  fn config_hash_follows_the_rendered_tag() {
    let context = TestContext::default();
    let mut other = TestContext::default();
    other.library.version = String::from("2.0.0");

    assert_ne!(
      VersionTagStage.config_hash(&context.target, &context.library),
      VersionTagStage.config_hash(&other.target, &other.library)
    );
  }
}
