use std::path::Path;
use std::string::FromUtf8Error;

use swc_core::common::comments::SingleThreadedComments;
use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, Globals, Mark, SourceMap, Spanned, GLOBALS};
use swc_core::ecma::ast::{EsVersion, Module, Program};
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::codegen::{Config as CodegenConfig, Emitter};
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{Parser, Syntax, TsSyntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::VisitMutWith;

use libpack_core::error::StageError;
use libpack_core::stage::{MapEffect, StageContext, StageOutput};

pub struct RunContext {
  /// Source-map in use
  pub source_map: Lrc<SourceMap>,
  /// Global mark from SWC resolver
  pub global_mark: Mark,
  /// Unresolved mark from SWC resolver
  pub unresolved_mark: Mark,
  pub comments: SingleThreadedComments,
}

/// How the transformed module is printed
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmitOptions {
  pub minify: bool,
  pub indent: &'static str,
  pub keep_comments: bool,
}

impl Default for EmitOptions {
  fn default() -> Self {
    Self {
      minify: false,
      indent: "  ",
      keep_comments: true,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum RunWithTransformationError {
  #[error("IO Error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid utf-8 output: {0}")]
  InvalidUtf8Output(#[from] FromUtf8Error),
  #[error("Failed to generate source map: {0}")]
  SourceMap(#[from] sourcemap::Error),
  #[error("Failed to read generated source map: {0}")]
  ReadSourceMap(#[from] libpack_sourcemap::SourceMapError),
}

/// Leading block comment lines, like the version tag, are kept verbatim by every stage.
///
/// Returns the banner and the code with the banner lines blanked out, so that line numbers
/// of the remaining code are unchanged.
pub fn split_banner(code: &str) -> (String, String) {
  let mut banner = String::new();
  let mut rest = code;

  loop {
    let (line, remaining) = match rest.find('\n') {
      Some(index) => (&rest[..index], &rest[index + 1..]),
      None => (rest, ""),
    };

    let trimmed = line.trim_end();
    let is_banner_line = trimmed.starts_with("/*")
      && trimmed.ends_with("*/")
      && trimmed.len() >= 4
      && !trimmed[2..trimmed.len() - 2].contains("*/");

    if !is_banner_line || rest.is_empty() {
      break;
    }

    banner.push_str(trimmed);
    banner.push('\n');
    rest = remaining;
  }

  let banner_lines = banner.lines().count();
  let masked = format!("{}{}", "\n".repeat(banner_lines), rest);
  (banner, masked)
}

/// TypeScript is a superset of the syntax every stage sees, so all input is parsed as such
pub fn syntax_for(path: &Path) -> Syntax {
  let tsx = path.extension().is_some_and(|ext| ext == "tsx");
  Syntax::Typescript(TsSyntax {
    tsx,
    decorators: true,
    ..Default::default()
  })
}

fn parse_error(
  stage: &str,
  file: &Path,
  source_map: &SourceMap,
  error: swc_core::ecma::parser::error::Error,
) -> StageError {
  let loc = source_map.lookup_char_pos(error.span().lo);
  StageError::new(stage, file, error.kind().msg().to_string()).at(loc.line as u32, loc.col_display as u32 + 1)
}

/// Parse `code` as a module of `file` into `source_map`
pub fn parse_module(
  stage: &str,
  file: &Path,
  code: String,
  source_map: &Lrc<SourceMap>,
  comments: &SingleThreadedComments,
) -> Result<Module, StageError> {
  let source_file =
    source_map.new_source_file(FileName::Real(file.to_path_buf()).into(), code.into());

  let lexer = Lexer::new(
    syntax_for(file),
    EsVersion::Es2022,
    StringInput::from(&*source_file),
    Some(comments),
  );

  let mut parser = Parser::new_from(lexer);
  let module = parser
    .parse_module()
    .map_err(|error| parse_error(stage, file, source_map, error))?;

  if let Some(error) = parser.take_errors().into_iter().next() {
    return Err(parse_error(stage, file, source_map, error));
  }

  Ok(module)
}

/// Passes that work on whole programs may hand back a script
pub fn into_module(program: Program) -> Module {
  match program {
    Program::Module(module) => module,
    Program::Script(script) => Module {
      span: script.span,
      shebang: script.shebang,
      body: script.body.into_iter().map(Into::into).collect(),
    },
  }
}

/// Parse `code`, run the resolver over it, then run `transform` on the module and print it.
///
/// The returned output carries a map of the printed code onto `code`.
pub fn run_with_transformation(
  stage: &str,
  ctx: &StageContext<'_>,
  code: &str,
  emit_options: EmitOptions,
  transform: impl FnOnce(&RunContext, &mut Module) -> Result<(), StageError>,
) -> Result<StageOutput, StageError> {
  let (banner, masked) = split_banner(code);
  let source_map: Lrc<SourceMap> = Default::default();
  let comments = SingleThreadedComments::default();
  let mut module = parse_module(stage, ctx.file_path, masked, &source_map, &comments)?;

  let into_stage_error =
    |error: RunWithTransformationError| StageError::new(stage, ctx.file_path, error.to_string());

  GLOBALS.set(&Globals::new(), || -> Result<StageOutput, StageError> {
    let global_mark = Mark::new();
    let unresolved_mark = Mark::new();
    module.visit_mut_with(&mut resolver(unresolved_mark, global_mark, true));

    let context = RunContext {
      source_map: source_map.clone(),
      global_mark,
      unresolved_mark,
      comments: comments.clone(),
    };
    transform(&context, &mut module)?;

    let (output_code, map) =
      emit(ctx, &source_map, &comments, &module, emit_options).map_err(into_stage_error)?;

    with_banner(banner, output_code, map).map_err(|error| {
      StageError::new(stage, ctx.file_path, error.to_string())
    })
  })
}

fn emit(
  ctx: &StageContext<'_>,
  source_map: &Lrc<SourceMap>,
  comments: &SingleThreadedComments,
  module: &Module,
  emit_options: EmitOptions,
) -> Result<(String, libpack_sourcemap::SourceMap), RunWithTransformationError> {
  let mut line_pos_buffer = vec![];
  let mut output_buffer = vec![];

  {
    let mut writer = JsWriter::new(
      source_map.clone(),
      "\n",
      &mut output_buffer,
      Some(&mut line_pos_buffer),
    );
    writer.set_indent_str(emit_options.indent);

    let mut cfg = CodegenConfig::default();
    cfg.target = EsVersion::Es2022;
    cfg.minify = emit_options.minify;

    let mut emitter = Emitter {
      cfg,
      cm: source_map.clone(),
      comments: if emit_options.keep_comments && !emit_options.minify {
        Some(comments)
      } else {
        None
      },
      wr: writer,
    };
    emitter.emit_module(module)?;
  }

  let mut output_code = String::from_utf8(output_buffer)?;
  if !output_code.ends_with('\n') {
    output_code.push('\n');
  }

  let mut output_map_buffer = vec![];
  source_map
    .build_source_map(&line_pos_buffer)
    .to_writer(&mut output_map_buffer)?;

  let map = libpack_sourcemap::SourceMap::from_json(
    ctx.project_root,
    &String::from_utf8(output_map_buffer)?,
  )?;

  Ok((output_code, map))
}

fn with_banner(
  banner: String,
  code: String,
  mut map: libpack_sourcemap::SourceMap,
) -> Result<StageOutput, libpack_sourcemap::SourceMapError> {
  if banner.is_empty() {
    return Ok(StageOutput {
      code,
      map: MapEffect::Remapped { map },
    });
  }

  map.offset_lines(0, banner.lines().count() as i64)?;

  Ok(StageOutput {
    code: format!("{}{}", banner, code),
    map: MapEffect::Remapped { map },
  })
}
