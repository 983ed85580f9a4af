use swc_core::common::{Mark, SyntaxContext};
use swc_core::ecma::ast::{Expr, Lit, MemberProp, UpdateExpr};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use libpack_core::error::StageError;
use libpack_core::hash::hash_parts;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::glue::parse_expr;
use crate::runner::{run_with_transformation, EmitOptions};

/// Replaces global expressions such as `process.env.NODE_ENV` with literal source text.
///
/// Assignment and update targets are never replaced.
#[derive(Debug, Default)]
pub struct ReplaceStage;

fn last_segment(key: &str) -> &str {
  key.rsplit('.').next().unwrap_or(key)
}

impl Stage for ReplaceStage {
  fn name(&self) -> &'static str {
    names::REPLACE
  }

  fn config_hash(&self, target: &TargetDescriptor, _library: &LibraryInfo) -> u64 {
    hash_parts(
      target
        .env
        .iter()
        .flat_map(|(key, value)| [key.as_str(), value.as_str()]),
    )
  }

  #[tracing::instrument(level = "trace", skip_all, fields(file = %ctx.file_path.display()))]
  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    let env = &ctx.target.env;
    if !env.keys().any(|key| code.contains(last_segment(key))) {
      return Ok(StageOutput::unchanged(code));
    }

    let mut replacements = Vec::with_capacity(env.len());
    for (key, value) in env {
      let expr = parse_expr(value).ok_or_else(|| {
        StageError::new(
          self.name(),
          ctx.file_path,
          format!("Replacement for {} is not an expression: {}", key, value),
        )
      })?;
      replacements.push((key.as_str(), expr));
    }

    run_with_transformation(
      self.name(),
      ctx,
      code,
      EmitOptions::default(),
      |run, module| {
        module.visit_mut_with(&mut EnvReplacer {
          replacements: &replacements,
          unresolved_mark: run.unresolved_mark,
        });
        Ok(())
      },
    )
  }
}

struct EnvReplacer<'a> {
  replacements: &'a [(&'a str, Box<Expr>)],
  unresolved_mark: Mark,
}

impl EnvReplacer<'_> {
  /// Dotted path of a global identifier or member chain, `None` for anything else
  fn expr_path(&self, expr: &Expr) -> Option<String> {
    match expr {
      Expr::Ident(ident)
        if ident.ctxt == SyntaxContext::empty().apply_mark(self.unresolved_mark) =>
      {
        Some(ident.sym.to_string())
      }
      Expr::Member(member) => {
        let object = self.expr_path(&member.obj)?;
        let property = match &member.prop {
          MemberProp::Ident(name) => name.sym.to_string(),
          MemberProp::Computed(computed) => match &*computed.expr {
            Expr::Lit(Lit::Str(s)) => s.value.to_string(),
            _ => return None,
          },
          MemberProp::PrivateName(_) => return None,
        };
        Some(format!("{}.{}", object, property))
      }
      _ => None,
    }
  }
}

impl VisitMut for EnvReplacer<'_> {
  fn visit_mut_expr(&mut self, expr: &mut Expr) {
    if let Some(path) = self.expr_path(expr) {
      if let Some((_, replacement)) = self.replacements.iter().find(|(key, _)| *key == path) {
        *expr = (**replacement).clone();
        return;
      }
    }

    expr.visit_mut_children_with(self);
  }

  fn visit_mut_update_expr(&mut self, node: &mut UpdateExpr) {
    node.arg.visit_mut_children_with(self);
  }
}
