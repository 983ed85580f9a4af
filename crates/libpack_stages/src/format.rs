use serde::Deserialize;
use swc_core::ecma::ast::Str;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use libpack_core::error::StageError;
use libpack_core::hash::hash_parts;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::runner::{run_with_transformation, EmitOptions};

const SPACES: [&str; 9] = [
  "",
  " ",
  "  ",
  "   ",
  "    ",
  "     ",
  "      ",
  "       ",
  "        ",
];

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FormatOptions {
  pub tab_width: usize,
  pub use_tabs: bool,
  pub single_quote: bool,
  /// Spaces inside single line braces, as in `{ a }`. The printer always emits them.
  pub bracket_spacing: bool,
}

impl Default for FormatOptions {
  fn default() -> Self {
    Self {
      tab_width: 2,
      use_tabs: false,
      single_quote: true,
      bracket_spacing: true,
    }
  }
}

impl FormatOptions {
  pub fn from_value(options: &serde_json::Value) -> Result<Self, String> {
    if options.is_null() {
      return Ok(Self::default());
    }

    let options: Self = serde_json::from_value(options.clone()).map_err(|err| err.to_string())?;
    if options.tab_width >= SPACES.len() {
      return Err(format!(
        "tabWidth must be below {}, got {}",
        SPACES.len(),
        options.tab_width
      ));
    }

    if !options.bracket_spacing {
      return Err(String::from("bracketSpacing: false is not supported"));
    }

    Ok(options)
  }

  pub fn indent(&self) -> &'static str {
    if self.use_tabs {
      "\t"
    } else {
      SPACES[self.tab_width.min(SPACES.len() - 1)]
    }
  }
}

/// Reprints code with a fixed indentation and quote style, keeping comments
#[derive(Debug, Default)]
pub struct FormatStage {
  options: FormatOptions,
}

impl FormatStage {
  pub fn new(options: FormatOptions) -> Self {
    Self { options }
  }
}

impl Stage for FormatStage {
  fn name(&self) -> &'static str {
    names::FORMAT
  }

  fn config_hash(&self, _target: &TargetDescriptor, _library: &LibraryInfo) -> u64 {
    hash_parts([
      self.options.tab_width.to_string().as_str(),
      if self.options.use_tabs { "tabs" } else { "spaces" },
      if self.options.single_quote { "'" } else { "\"" },
    ])
  }

  #[tracing::instrument(level = "trace", skip_all, fields(file = %ctx.file_path.display()))]
  fn transform(&self, ctx: &StageContext<'_>, code: &str) -> Result<StageOutput, StageError> {
    run_with_transformation(
      self.name(),
      ctx,
      code,
      EmitOptions {
        indent: self.options.indent(),
        ..EmitOptions::default()
      },
      |_, module| {
        module.visit_mut_with(&mut Quotes {
          preferred: if self.options.single_quote { '\'' } else { '"' },
        });
        Ok(())
      },
    )
  }
}

struct Quotes {
  preferred: char,
}

impl Quotes {
  fn enclosing_quote(&self, content: &str) -> char {
    let alternate = if self.preferred == '"' { '\'' } else { '"' };
    let preferred_count = content.matches(self.preferred).count();
    let alternate_count = content.matches(alternate).count();

    if preferred_count > alternate_count {
      alternate
    } else {
      self.preferred
    }
  }
}

/// Re-quote the body of a string literal, keeping its escapes except for quotes
fn requote(body: &str, quote: char) -> String {
  let mut output = String::with_capacity(body.len() + 2);
  output.push(quote);

  let mut chars = body.chars();
  while let Some(c) = chars.next() {
    match c {
      '\\' => match chars.next() {
        Some(escaped @ ('"' | '\'')) if escaped != quote => output.push(escaped),
        Some(escaped) => {
          output.push('\\');
          output.push(escaped);
        }
        None => output.push('\\'),
      },
      c if c == quote => {
        output.push('\\');
        output.push(c);
      }
      c => output.push(c),
    }
  }

  output.push(quote);
  output
}

/// Escape a decoded string value for literals that were never in the source
fn escape(value: &str, quote: char) -> String {
  let mut body = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '\\' => body.push_str("\\\\"),
      '\n' => body.push_str("\\n"),
      '\r' => body.push_str("\\r"),
      '\t' => body.push_str("\\t"),
      '\u{2028}' => body.push_str("\\u2028"),
      '\u{2029}' => body.push_str("\\u2029"),
      c if c.is_control() => body.push_str(&format!("\\x{:02x}", c as u32)),
      c => body.push(c),
    }
  }

  requote(&body, quote)
}

impl VisitMut for Quotes {
  fn visit_mut_str(&mut self, s: &mut Str) {
    let raw = match &s.raw {
      Some(raw) if raw.len() >= 2 => {
        let body = &raw[1..raw.len() - 1];
        requote(body, self.enclosing_quote(body))
      }
      _ => escape(&s.value, self.enclosing_quote(&s.value)),
    };

    s.raw = Some(raw.into());
  }
}
