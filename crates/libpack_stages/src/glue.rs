//! Builds AST fragments from source text for the stages that generate code.

use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, SourceMap, Span, DUMMY_SP};
use swc_core::ecma::ast::{EsVersion, Expr, ModuleItem};
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{Parser, Syntax};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

struct DropSpans;

impl VisitMut for DropSpans {
  fn visit_mut_span(&mut self, span: &mut Span) {
    *span = DUMMY_SP;
  }
}

/// Fragments are printed into other files, so their spans must not point into this one
fn with_parser<R: VisitMutWith<DropSpans>>(
  code: &str,
  parse: impl FnOnce(&mut Parser<Lexer<'_>>) -> Option<R>,
) -> Option<R> {
  let source_map: Lrc<SourceMap> = Default::default();
  let source_file = source_map.new_source_file(
    FileName::Custom(String::from("glue")).into(),
    code.to_string().into(),
  );

  let lexer = Lexer::new(
    Syntax::Es(Default::default()),
    EsVersion::Es2022,
    StringInput::from(&*source_file),
    None,
  );

  let mut parser = Parser::new_from(lexer);
  let mut result = parse(&mut parser)?;
  if !parser.take_errors().is_empty() {
    return None;
  }

  result.visit_mut_with(&mut DropSpans);
  Some(result)
}

/// Parse a single expression, `None` if `code` is not one
pub fn parse_expr(code: &str) -> Option<Box<Expr>> {
  with_parser(code, |parser| parser.parse_expr().ok())
}

/// Parse module items, `None` if `code` is not a valid module
pub fn parse_items(code: &str) -> Option<Vec<ModuleItem>> {
  with_parser(code, |parser| parser.parse_module().ok()).map(|module| module.body)
}
