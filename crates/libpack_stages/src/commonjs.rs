use swc_core::atoms::Atom;
use swc_core::common::util::take::Take;
use swc_core::common::{SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;

use libpack_core::error::StageError;
use libpack_core::stage::{names, Stage, StageContext, StageOutput};
use libpack_core::types::{LibraryInfo, TargetDescriptor};

use crate::glue::parse_items;
use crate::idents::{binding_idents, is_identifier_name, UsedNames};
use crate::runner::{run_with_transformation, EmitOptions};

const INTEROP_DEFAULT_HELPER: &str =
  "function __interopDefault(m) { return m && m.__esModule ? m.default : m; }";

const EXPORT_STAR_HELPER: &str = r#"function __exportStar(m, e) {
  Object.keys(m).forEach(function (k) {
    if (k !== "default" && !Object.prototype.hasOwnProperty.call(e, k)) e[k] = m[k];
  });
}"#;

/// Converts ES module syntax to CommonJS.
///
/// Exports follow the "auto" convention: a module whose only export is the default export
/// assigns it to `module.exports`, otherwise every export becomes a property of `exports` and
/// modules mixing both are flagged with `__esModule`.
#[derive(Debug, Default)]
pub struct CommonJsStage;

impl Stage for CommonJsStage {
  fn name(&self) -> &'static str {
    names::COMMONJS
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
      |_, module| {
        let converter = EsmToCjs::new(module);
        module.body = converter
          .convert(module.body.take())
          .ok_or_else(|| StageError::new(names::COMMONJS, ctx.file_path, "Failed to build require statements"))?;
        Ok(())
      },
    )
  }
}

#[derive(Clone, Copy, PartialEq)]
enum ExportMode {
  /// The default export is the whole module
  Default,
  Named { es_module_flag: bool },
}

struct EsmToCjs {
  mode: ExportMode,
  used_names: UsedNames,
  needs_interop: bool,
  needs_export_star: bool,
  /// Export assignments appended after the module body
  exports: Vec<ModuleItem>,
}

fn quote(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}

fn export_name(name: &ModuleExportName) -> Atom {
  match name {
    ModuleExportName::Ident(ident) => ident.sym.clone(),
    ModuleExportName::Str(s) => s.value.clone(),
  }
}

fn property_access(object: &str, property: &str) -> String {
  if is_identifier_name(property) {
    format!("{}.{}", object, property)
  } else {
    format!("{}[{}]", object, quote(property))
  }
}

fn assign_stmt(target: MemberExpr, right: Box<Expr>) -> ModuleItem {
  ModuleItem::Stmt(Stmt::Expr(ExprStmt {
    span: DUMMY_SP,
    expr: Box::new(Expr::Assign(AssignExpr {
      span: DUMMY_SP,
      op: AssignOp::Assign,
      left: AssignTarget::Simple(SimpleAssignTarget::Member(target)),
      right,
    })),
  }))
}

fn member(object: &str, property: &str) -> MemberExpr {
  let obj = Box::new(Expr::Ident(Ident::new(
    object.into(),
    DUMMY_SP,
    SyntaxContext::empty(),
  )));

  let prop = if is_identifier_name(property) {
    MemberProp::Ident(IdentName::new(property.into(), DUMMY_SP))
  } else {
    MemberProp::Computed(ComputedPropName {
      span: DUMMY_SP,
      expr: Box::new(Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: property.into(),
        raw: None,
      }))),
    })
  };

  MemberExpr {
    span: DUMMY_SP,
    obj,
    prop,
  }
}

impl EsmToCjs {
  fn new(module: &Module) -> Self {
    let mut has_default = false;
    let mut has_named = false;

    for item in &module.body {
      let ModuleItem::ModuleDecl(decl) = item else {
        continue;
      };

      match decl {
        ModuleDecl::ExportDefaultDecl(_) | ModuleDecl::ExportDefaultExpr(_) => has_default = true,
        ModuleDecl::ExportDecl(_) | ModuleDecl::ExportAll(_) => has_named = true,
        ModuleDecl::ExportNamed(named) if !named.type_only => {
          for specifier in &named.specifiers {
            match specifier {
              ExportSpecifier::Named(named) => {
                let exported = named.exported.as_ref().unwrap_or(&named.orig);
                if &*export_name(exported) == "default" {
                  has_default = true;
                } else {
                  has_named = true;
                }
              }
              _ => has_named = true,
            }
          }
        }
        _ => {}
      }
    }

    let mode = if has_default && !has_named {
      ExportMode::Default
    } else {
      ExportMode::Named {
        es_module_flag: has_default,
      }
    };

    Self {
      mode,
      used_names: UsedNames::collect(module),
      needs_interop: false,
      needs_export_star: false,
      exports: Vec::new(),
    }
  }

  fn export_target(&self, exported: &str) -> MemberExpr {
    if exported == "default" && self.mode == ExportMode::Default {
      member("module", "exports")
    } else {
      member("exports", exported)
    }
  }

  fn convert(mut self, body: Vec<ModuleItem>) -> Option<Vec<ModuleItem>> {
    let mut output = Vec::with_capacity(body.len() + 2);

    for item in body {
      match item {
        ModuleItem::ModuleDecl(decl) => self.convert_decl(decl, &mut output)?,
        ModuleItem::Stmt(stmt) => output.push(ModuleItem::Stmt(stmt)),
      }
    }

    let mut prologue = Vec::new();
    let has_directive = matches!(
      output.first(),
      Some(ModuleItem::Stmt(Stmt::Expr(ExprStmt { expr, .. })))
        if matches!(&**expr, Expr::Lit(Lit::Str(s)) if &*s.value == "use strict")
    );

    if !has_directive {
      prologue.extend(parse_items("\"use strict\";")?);
    }

    if matches!(self.mode, ExportMode::Named { es_module_flag: true }) {
      prologue.extend(parse_items(
        "Object.defineProperty(exports, \"__esModule\", { value: true });",
      )?);
    }

    if self.needs_interop {
      prologue.extend(parse_items(INTEROP_DEFAULT_HELPER)?);
    }

    if self.needs_export_star {
      prologue.extend(parse_items(EXPORT_STAR_HELPER)?);
    }

    if has_directive {
      let directive = output.remove(0);
      prologue.insert(0, directive);
    }

    prologue.extend(output);
    prologue.extend(self.exports);
    Some(prologue)
  }

  fn convert_decl(&mut self, decl: ModuleDecl, output: &mut Vec<ModuleItem>) -> Option<()> {
    match decl {
      ModuleDecl::Import(import) => {
        if !import.type_only {
          output.extend(self.convert_import(&import)?);
        }
      }
      ModuleDecl::ExportDecl(export) => {
        let mut idents = Vec::new();
        match &export.decl {
          Decl::Var(var) => {
            for decl in &var.decls {
              binding_idents(&decl.name, &mut idents);
            }
          }
          Decl::Fn(function) => idents.push(function.ident.clone()),
          Decl::Class(class) => idents.push(class.ident.clone()),
          _ => {}
        }

        output.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
        for ident in idents {
          let target = self.export_target(&ident.sym);
          self
            .exports
            .push(assign_stmt(target, Box::new(Expr::Ident(ident))));
        }
      }
      ModuleDecl::ExportNamed(named) => {
        if named.type_only {
          return Some(());
        }

        match &named.src {
          None => {
            for specifier in named.specifiers {
              if let ExportSpecifier::Named(specifier) = specifier {
                let exported = export_name(specifier.exported.as_ref().unwrap_or(&specifier.orig));
                if let ModuleExportName::Ident(local) = specifier.orig {
                  let target = self.export_target(&exported);
                  self
                    .exports
                    .push(assign_stmt(target, Box::new(Expr::Ident(local))));
                }
              }
            }
          }
          Some(src) => output.extend(self.convert_reexport(&src.value, &named.specifiers)?),
        }
      }
      ModuleDecl::ExportAll(export) => {
        if !export.type_only {
          self.needs_export_star = true;
          output.extend(parse_items(&format!(
            "__exportStar(require({}), exports);",
            quote(&export.src.value)
          ))?);
        }
      }
      ModuleDecl::ExportDefaultDecl(export) => {
        let target = self.export_target("default");
        match export.decl {
          DefaultDecl::Fn(FnExpr {
            ident: Some(ident),
            function,
          }) => {
            output.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(FnDecl {
              ident: ident.clone(),
              declare: false,
              function,
            }))));
            self
              .exports
              .push(assign_stmt(target, Box::new(Expr::Ident(ident))));
          }
          DefaultDecl::Class(ClassExpr {
            ident: Some(ident),
            class,
          }) => {
            output.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(ClassDecl {
              ident: ident.clone(),
              declare: false,
              class,
            }))));
            self
              .exports
              .push(assign_stmt(target, Box::new(Expr::Ident(ident))));
          }
          DefaultDecl::Fn(function) => {
            output.push(assign_stmt(target, Box::new(Expr::Fn(function))));
          }
          DefaultDecl::Class(class) => {
            output.push(assign_stmt(target, Box::new(Expr::Class(class))));
          }
          DefaultDecl::TsInterfaceDecl(_) => {}
        }
      }
      ModuleDecl::ExportDefaultExpr(export) => {
        let target = self.export_target("default");
        output.push(assign_stmt(target, export.expr));
      }
      other => output.push(ModuleItem::ModuleDecl(other)),
    }

    Some(())
  }

  fn require_name(&mut self, src: &str) -> Atom {
    let stem = src
      .rsplit('/')
      .next()
      .unwrap_or(src)
      .split('.')
      .next()
      .unwrap_or_default()
      .chars()
      .map(|c| if c.is_alphanumeric() { c } else { '_' })
      .collect::<String>();

    self.used_names.fresh(&format!("__{}", stem))
  }

  fn convert_import(&mut self, import: &ImportDecl) -> Option<Vec<ModuleItem>> {
    let require = format!("require({})", quote(&import.src.value));

    let mut default_local = None;
    let mut namespace_local = None;
    let mut named = Vec::new();

    for specifier in &import.specifiers {
      match specifier {
        ImportSpecifier::Default(default) => default_local = Some(default.local.sym.clone()),
        ImportSpecifier::Namespace(namespace) => {
          namespace_local = Some(namespace.local.sym.clone())
        }
        ImportSpecifier::Named(specifier) if !specifier.is_type_only => {
          let imported = specifier
            .imported
            .as_ref()
            .map(export_name)
            .unwrap_or_else(|| specifier.local.sym.clone());

          if &*imported == "default" {
            default_local = Some(specifier.local.sym.clone());
          } else {
            named.push((imported, specifier.local.sym.clone()));
          }
        }
        ImportSpecifier::Named(_) => {}
      }
    }

    if import.specifiers.is_empty() {
      return parse_items(&format!("{};", require));
    }

    let mut statements = Vec::new();
    let source = match (&namespace_local, &default_local, named.is_empty()) {
      (Some(namespace), _, _) => {
        statements.push(format!("const {} = {};", namespace, require));
        namespace.to_string()
      }
      (None, Some(_), false) => {
        let name = self.require_name(&import.src.value);
        statements.push(format!("const {} = {};", name, require));
        name.to_string()
      }
      _ => require,
    };

    if let Some(default) = default_local {
      self.needs_interop = true;
      statements.push(format!("const {} = __interopDefault({});", default, source));
    }

    if !named.is_empty() {
      let properties = named
        .iter()
        .map(|(imported, local)| {
          if imported == local {
            local.to_string()
          } else if is_identifier_name(imported) {
            format!("{}: {}", imported, local)
          } else {
            format!("{}: {}", quote(imported), local)
          }
        })
        .collect::<Vec<_>>()
        .join(", ");

      statements.push(format!("const {{ {} }} = {};", properties, source));
    }

    parse_items(&statements.join("\n"))
  }

  fn convert_reexport(
    &mut self,
    src: &str,
    specifiers: &[ExportSpecifier],
  ) -> Option<Vec<ModuleItem>> {
    let require = format!("require({})", quote(src));
    let name = self.require_name(src);
    let mut statements = vec![format!("const {} = {};", name, require)];

    for specifier in specifiers {
      match specifier {
        ExportSpecifier::Namespace(namespace) => {
          let target = property_access("exports", &export_name(&namespace.name));
          statements.push(format!("{} = {};", target, name));
        }
        ExportSpecifier::Named(specifier) if !specifier.is_type_only => {
          let orig = export_name(&specifier.orig);
          let exported = specifier
            .exported
            .as_ref()
            .map(export_name)
            .unwrap_or_else(|| orig.clone());

          let target = if &*exported == "default" && self.mode == ExportMode::Default {
            String::from("module.exports")
          } else {
            property_access("exports", &exported)
          };

          let value = if &*orig == "default" {
            self.needs_interop = true;
            format!("__interopDefault({})", name)
          } else {
            property_access(&name, &orig)
          };

          statements.push(format!("{} = {};", target, value));
        }
        _ => {}
      }
    }

    parse_items(&statements.join("\n"))
  }
}
