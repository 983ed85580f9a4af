use std::collections::HashMap;

use swc_core::common::comments::{Comments, SingleThreadedComments};
use swc_core::common::{Mark, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

use libpack_core::error::StageError;
use libpack_core::hash::hash_parts;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::format::FormatOptions;
use crate::runner::{run_with_transformation, EmitOptions};

/// Final clean-up of the emitted code.
///
/// Function expressions passed as call arguments are wrapped in parentheses, which hints
/// engines to compile them eagerly. Targets that declare their modules free of side effects
/// also lose every top-level declaration that nothing references and whose initializer is
/// pure.
#[derive(Debug, Default)]
pub struct OptimizeStage;

/// The optimizer prints in the style of the format stage declared on the target, if any
fn emit_options(target: &TargetDescriptor) -> EmitOptions {
  let indent = target
    .stages
    .iter()
    .find(|stage| stage.name == names::FORMAT)
    .and_then(|stage| FormatOptions::from_value(&stage.options).ok())
    .unwrap_or_default()
    .indent();

  EmitOptions {
    minify: target.minify,
    indent,
    keep_comments: !target.minify,
  }
}

impl Stage for OptimizeStage {
  fn name(&self) -> &'static str {
    names::OPTIMIZE
  }

  fn config_hash(&self, target: &TargetDescriptor, _library: &LibraryInfo) -> u64 {
    let emit_options = emit_options(target);
    hash_parts([
      if target.module_side_effects { "side-effects" } else { "pure" },
      if emit_options.minify { "minify" } else { "" },
      emit_options.indent,
    ])
  }

  #[tracing::instrument(level = "trace", skip_all, fields(file = %ctx.file_path.display()))]
  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    run_with_transformation(
      self.name(),
      ctx,
      code,
      emit_options(ctx.target),
      |run, module| {
        module.visit_mut_with(&mut WrapFunctionArguments);

        if !ctx.target.module_side_effects {
          let unused = UnusedDeclarations {
            comments: &run.comments,
            unresolved_mark: run.unresolved_mark,
          };

          let mut removed = 0;
          loop {
            let count = unused.remove(module);
            if count == 0 {
              break;
            }
            removed += count;
          }

          tracing::trace!("Removed {} unused declarations", removed);
        }

        Ok(())
      },
    )
  }
}

struct WrapFunctionArguments;

fn wrap(args: &mut [ExprOrSpread]) {
  for arg in args {
    if arg.spread.is_none() && matches!(*arg.expr, Expr::Fn(_)) {
      let expr = std::mem::replace(&mut arg.expr, Expr::undefined(DUMMY_SP));
      arg.expr = Box::new(Expr::Paren(ParenExpr {
        span: DUMMY_SP,
        expr,
      }));
    }
  }
}

impl VisitMut for WrapFunctionArguments {
  fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
    call.visit_mut_children_with(self);
    wrap(&mut call.args);
  }

  fn visit_mut_new_expr(&mut self, new: &mut NewExpr) {
    new.visit_mut_children_with(self);
    if let Some(args) = &mut new.args {
      wrap(args);
    }
  }
}

/// Counts every occurrence of each binding, declarations included
#[derive(Default)]
struct References {
  counts: HashMap<Id, usize>,
}

impl Visit for References {
  fn visit_ident(&mut self, ident: &Ident) {
    *self.counts.entry(ident.to_id()).or_default() += 1;
  }
}

struct UnusedDeclarations<'a> {
  comments: &'a SingleThreadedComments,
  unresolved_mark: Mark,
}

impl UnusedDeclarations<'_> {
  /// Remove one round of unused declarations, returning how many were removed
  fn remove(&self, module: &mut Module) -> usize {
    let mut references = References::default();
    module.visit_with(&mut references);

    // A binding whose only occurrence is its own declaration is unused
    let unused = |ident: &Ident| references.counts.get(&ident.to_id()).copied().unwrap_or(0) <= 1;

    let mut removed = 0;
    module.body.retain_mut(|item| {
      let ModuleItem::Stmt(Stmt::Decl(decl)) = item else {
        return true;
      };

      match decl {
        Decl::Fn(function) => {
          if unused(&function.ident) {
            removed += 1;
            return false;
          }
          true
        }
        Decl::Class(class) => {
          if unused(&class.ident) && self.is_pure_class(&class.class) {
            removed += 1;
            return false;
          }
          true
        }
        Decl::Var(var) => {
          let before = var.decls.len();
          var.decls.retain(|declarator| {
            let Pat::Ident(binding) = &declarator.name else {
              return true;
            };

            let pure = declarator
              .init
              .as_ref()
              .map_or(true, |init| self.is_pure(init));
            !(pure && unused(&binding.id))
          });

          removed += before - var.decls.len();
          !var.decls.is_empty()
        }
        _ => true,
      }
    });

    removed
  }

  fn is_pure_class(&self, class: &Class) -> bool {
    class.super_class.is_none()
      && class.decorators.is_empty()
      && class.body.iter().all(|member| match member {
        ClassMember::Constructor(_) | ClassMember::Method(_) | ClassMember::PrivateMethod(_) => {
          true
        }
        ClassMember::ClassProp(prop) => {
          !prop.is_static && !matches!(prop.key, PropName::Computed(_))
        }
        ClassMember::PrivateProp(prop) => !prop.is_static,
        ClassMember::Empty(_) => true,
        _ => false,
      })
  }

  fn is_pure_call(&self, span: swc_core::common::Span, args: &[ExprOrSpread]) -> bool {
    self.comments.has_flag(span.lo, "PURE")
      && args
        .iter()
        .all(|arg| arg.spread.is_none() && self.is_pure(&arg.expr))
  }

  fn is_pure(&self, expr: &Expr) -> bool {
    match expr {
      Expr::Lit(_) | Expr::Fn(_) | Expr::Arrow(_) | Expr::This(_) => true,
      // Reading an undeclared global may throw
      Expr::Ident(ident) => ident.ctxt.outer() != self.unresolved_mark,
      Expr::Paren(paren) => self.is_pure(&paren.expr),
      Expr::Tpl(tpl) => tpl.exprs.iter().all(|expr| self.is_pure(expr)),
      Expr::Unary(unary) => match unary.op {
        UnaryOp::Bang | UnaryOp::Void | UnaryOp::TypeOf => self.is_pure(&unary.arg),
        UnaryOp::Minus | UnaryOp::Plus => matches!(*unary.arg, Expr::Lit(Lit::Num(_))),
        _ => false,
      },
      Expr::Array(array) => array
        .elems
        .iter()
        .flatten()
        .all(|elem| elem.spread.is_none() && self.is_pure(&elem.expr)),
      Expr::Object(object) => object.props.iter().all(|prop| match prop {
        PropOrSpread::Spread(_) => false,
        PropOrSpread::Prop(prop) => match &**prop {
          Prop::Shorthand(ident) => ident.ctxt.outer() != self.unresolved_mark,
          Prop::KeyValue(kv) => {
            !matches!(kv.key, PropName::Computed(_)) && self.is_pure(&kv.value)
          }
          Prop::Method(method) => !matches!(method.key, PropName::Computed(_)),
          _ => false,
        },
      }),
      Expr::Call(call) => self.is_pure_call(call.span, &call.args),
      Expr::New(new) => self.is_pure_call(new.span, new.args.as_deref().unwrap_or_default()),
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use pretty_assertions::assert_eq;

  use libpack_core::types::StageRef;

  use crate::test_utils::TestContext;

  use super::*;

  fn pure_context() -> TestContext {
    let mut context = TestContext::default();
    context.target.module_side_effects = false;
    context
  }

  #[test]
  fn wraps_function_arguments_in_parentheses() {
    let code = TestContext::default().code(
      &OptimizeStage,
      "run(function () {\n  return 1;\n});\n",
    );

    assert_eq!(code, "run((function() {\n  return 1;\n}));\n");
  }

  #[test]
  fn keeps_declarations_when_modules_have_side_effects() {
    let mut context = TestContext::default();
    context.target.module_side_effects = true;

    let code = context.code(&OptimizeStage, "const unused = 1;\nexport const a = 2;\n");

    assert_eq!(code, "const unused = 1;\nexport const a = 2;\n");
  }

  #[test]
  fn drops_unreferenced_pure_declarations() {
    let code = pure_context().code(
      &OptimizeStage,
      indoc! {r#"
        const unused = 1;
        const helper = () => unused;
        function dead() {}
        const used = "a";
        const effect = sideEffect();
        export const value = used;
      "#},
    );

    assert_eq!(
      code,
      indoc! {r#"
        const used = "a";
        const effect = sideEffect();
        export const value = used;
      "#}
    );
  }

  #[test]
  fn keeps_declarations_referenced_by_export_lists() {
    let code = pure_context().code(&OptimizeStage, "const a = 1;\nexport { a };\n");

    assert_eq!(code, "const a = 1;\nexport { a };\n");
  }

  #[test]
  fn drops_pure_annotated_calls() {
    let code = pure_context().code(
      &OptimizeStage,
      "const registry = /*#__PURE__*/ createRegistry();\nexport const a = 1;\n",
    );

    assert_eq!(code, "export const a = 1;\n");
  }

  #[test]
  fn prints_with_the_format_stage_indentation() {
    let mut context = TestContext::default();
    context.target.stages = vec![StageRef::with_options(
      names::FORMAT,
      serde_json::json!({ "tabWidth": 4 }),
    )];

    let code = context.code(&OptimizeStage, "function a() {\n  return 1;\n}\n");

    assert_eq!(code, "function a() {\n    return 1;\n}\n");
  }
}
