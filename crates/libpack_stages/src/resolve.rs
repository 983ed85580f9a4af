use std::collections::BTreeMap;

use swc_core::ecma::ast::{CallExpr, Callee, ExportAll, Expr, ImportDecl, Lit, NamedExport, Str};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use libpack_core::error::StageError;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::runner::{run_with_transformation, EmitOptions};

/// Rewrites import specifiers to the files they are emitted as.
///
/// The rewrite table is resolved by the module graph and handed over through
/// `StageContext::specifiers`. Specifiers missing from it, such as bare package names, are
/// external and stay untouched.
#[derive(Debug, Default)]
pub struct ResolveStage;

impl Stage for ResolveStage {
  fn name(&self) -> &'static str {
    names::RESOLVE
  }

  fn config_hash(&self, _target: &TargetDescriptor, _library: &LibraryInfo) -> u64 {
    0
  }

  #[tracing::instrument(level = "trace", skip_all, fields(file = %ctx.file_path.display()))]
  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    let rewrites = ctx
      .specifiers
      .iter()
      .filter(|(from, to)| from != to)
      .collect::<BTreeMap<_, _>>();

    if rewrites.is_empty() {
      return Ok(StageOutput::unchanged(code));
    }

    run_with_transformation(
      self.name(),
      ctx,
      code,
      EmitOptions::default(),
      |_, module| {
        module.visit_mut_with(&mut SpecifierRewriter {
          specifiers: ctx.specifiers,
        });
        Ok(())
      },
    )
  }
}

struct SpecifierRewriter<'a> {
  specifiers: &'a BTreeMap<String, String>,
}

impl SpecifierRewriter<'_> {
  fn rewrite(&self, src: &mut Str) {
    if let Some(resolved) = self.specifiers.get(&*src.value) {
      *src = Str {
        span: src.span,
        value: resolved.as_str().into(),
        raw: None,
      };
    }
  }
}

impl VisitMut for SpecifierRewriter<'_> {
  fn visit_mut_import_decl(&mut self, node: &mut ImportDecl) {
    self.rewrite(&mut node.src);
  }

  fn visit_mut_named_export(&mut self, node: &mut NamedExport) {
    if let Some(src) = node.src.as_mut() {
      self.rewrite(src);
    }
  }

  fn visit_mut_export_all(&mut self, node: &mut ExportAll) {
    self.rewrite(&mut node.src);
  }

  fn visit_mut_call_expr(&mut self, node: &mut CallExpr) {
    node.visit_mut_children_with(self);

    if !matches!(node.callee, Callee::Import(_)) {
      return;
    }

    if let Some(Expr::Lit(Lit::Str(src))) = node.args.first_mut().map(|arg| &mut *arg.expr) {
      self.rewrite(src);
    }
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use libpack_core::stage::MapEffect;
  use pretty_assertions::assert_eq;

  use crate::test_utils::TestContext;

  use super::*;

  fn context() -> TestContext {
    let mut context = TestContext::default();
    context
      .specifiers
      .insert(String::from("./utils"), String::from("./utils.js"));
    context
      .specifiers
      .insert(String::from("./math"), String::from("./math/index.js"));
    context
  }

  #[test]
  fn rewrites_relative_specifiers() {
    let code = context().code(
      &ResolveStage,
      indoc! {r#"
        import { a } from "./utils";
        export * from "./math";
        export { b } from "./utils";
        import React from "react";
        const lazy = () => import("./utils");
      "#},
    );

    assert!(code.contains("import { a } from \"./utils.js\";"));
    assert!(code.contains("export * from \"./math/index.js\";"));
    assert!(code.contains("export { b } from \"./utils.js\";"));
    assert!(code.contains("import React from \"react\";"));
    assert!(code.contains("import(\"./utils.js\")"));
  }

  #[test]
  fn leaves_modules_without_local_imports_unchanged() {
    let mut context = TestContext::default();
    context
      .specifiers
      .insert(String::from("react"), String::from("react"));

    let output = context.run(&ResolveStage, "import React from 'react';");

    assert_eq!(output.map, MapEffect::Unchanged);
  }
}
