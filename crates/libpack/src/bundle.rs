//! Single-file bundling.
//!
//! Every non-entry module becomes a constant holding the result of an immediately invoked
//! arrow function that returns the module's exports:
//!
//! ```text
//! const __m_utils = (() => {
//!   const add = (a, b) => a + b;
//!   return { add };
//! })();
//! ```
//!
//! Imports of internal modules turn into destructuring of these objects. External packages
//! are imported once at the head of the bundle, the entry module keeps its `export` syntax.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use swc_core::atoms::Atom;
use swc_core::common::util::take::Take;
use swc_core::common::{SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use libpack_core::error::StageError;
use libpack_core::stage::{MapEffect, StageContext};
use libpack_core::types::{LibraryInfo, TargetDescriptor};
use libpack_sourcemap::SourceMap;
use libpack_stages::glue::{parse_expr, parse_items};
use libpack_stages::idents::{binding_idents, is_identifier_name, UsedNames};
use libpack_stages::runner::{run_with_transformation, EmitOptions};

use crate::graph::{ModuleGraph, ModuleNode};

/// Reported as the failing stage when a module can not be linked into the bundle
pub const BUNDLE_STAGE: &str = "bundle";

#[derive(Clone, Debug)]
pub struct Bundle {
  pub code: String,
  /// Maps the bundle onto the original modules
  pub map: SourceMap,
}

/// Names a module exports at runtime
#[derive(Clone, Debug, Default)]
struct ExportSurface {
  names: IndexSet<String>,
  /// Re-exports all of an external package, so any name may exist
  open: bool,
}

impl ExportSurface {
  fn has(&self, name: &str) -> bool {
    self.open || self.names.contains(name)
  }
}

#[derive(Default)]
struct ExternalImport {
  namespace: Option<String>,
  default: Option<String>,
}

/// External packages, each imported once at the head of the bundle
#[derive(Default)]
struct Externals {
  sources: IndexMap<String, ExternalImport>,
  taken: HashSet<String>,
}

fn sanitize(specifier: &str) -> String {
  specifier
    .trim_start_matches(['.', '/'])
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
    .collect()
}

fn quote(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}

/// `object.property`, or `object["property"]` when the property is not an identifier
fn property_access(object: &str, property: &str) -> String {
  if is_identifier_name(property) {
    format!("{}.{}", object, property)
  } else {
    format!("{}[{}]", object, quote(property))
  }
}

fn export_name(name: &ModuleExportName) -> Atom {
  match name {
    ModuleExportName::Ident(ident) => ident.sym.clone(),
    ModuleExportName::Str(s) => s.value.clone(),
  }
}

impl Externals {
  fn unique(&mut self, base: String) -> String {
    let mut candidate = base.clone();
    let mut counter = 2;
    while !self.taken.insert(candidate.clone()) {
      candidate = format!("{}{}", base, counter);
      counter += 1;
    }
    candidate
  }

  fn side_effect(&mut self, src: &str) {
    self.sources.entry(src.to_string()).or_default();
  }

  fn namespace(&mut self, src: &str) -> String {
    if let Some(name) = self.sources.get(src).and_then(|import| import.namespace.clone()) {
      return name;
    }

    let name = self.unique(format!("__ext_{}", sanitize(src)));
    self.sources.entry(src.to_string()).or_default().namespace = Some(name.clone());
    name
  }

  fn default(&mut self, src: &str) -> String {
    if let Some(name) = self.sources.get(src).and_then(|import| import.default.clone()) {
      return name;
    }

    let name = self.unique(format!("__ext_{}_default", sanitize(src)));
    self.sources.entry(src.to_string()).or_default().default = Some(name.clone());
    name
  }

  fn render(&self) -> String {
    let mut head = String::new();
    for (src, import) in &self.sources {
      let line = match (&import.default, &import.namespace) {
        (Some(default), Some(namespace)) => {
          format!("import {}, * as {} from {};", default, namespace, quote(src))
        }
        (Some(default), None) => format!("import {} from {};", default, quote(src)),
        (None, Some(namespace)) => format!("import * as {} from {};", namespace, quote(src)),
        (None, None) => format!("import {};", quote(src)),
      };

      head.push_str(&line);
      head.push('\n');
    }
    head
  }
}

/// Module-scoped constant holding the exports of `path`
fn module_binding(base: &Path, path: &Path) -> String {
  let relative = path.strip_prefix(base).unwrap_or(path).with_extension("");
  format!("__m_{}", sanitize(&relative.to_string_lossy()))
}

/// One binding per module, suffixed with a counter when two paths sanitize to the same name
fn module_bindings<'a>(
  base: &Path,
  paths: impl IntoIterator<Item = &'a Path>,
) -> HashMap<PathBuf, String> {
  let mut taken = HashSet::new();
  let mut bindings = HashMap::new();

  for path in paths {
    let name = module_binding(base, path);
    let mut candidate = name.clone();
    let mut counter = 2;
    while !taken.insert(candidate.clone()) {
      candidate = format!("{}{}", name, counter);
      counter += 1;
    }

    bindings.insert(path.to_path_buf(), candidate);
  }

  bindings
}

/// Deepest directory containing every module
pub fn common_base(paths: &[&Path]) -> PathBuf {
  let mut base = paths
    .first()
    .and_then(|path| path.parent())
    .map(Path::to_path_buf)
    .unwrap_or_default();

  for path in paths.iter().skip(1) {
    while !path.starts_with(&base) {
      if !base.pop() {
        break;
      }
    }
  }

  base
}

fn is_declare(decl: &Decl) -> bool {
  match decl {
    Decl::Var(var) => var.declare,
    Decl::Fn(function) => function.declare,
    Decl::Class(class) => class.declare,
    Decl::TsEnum(ts_enum) => ts_enum.declare,
    Decl::TsModule(ts_module) => ts_module.declare,
    _ => false,
  }
}

/// Bindings a declaration creates at runtime
fn value_names(decl: &Decl) -> Vec<Ident> {
  if is_declare(decl) {
    return vec![];
  }

  let mut idents = vec![];
  match decl {
    Decl::Var(var) => {
      for declarator in &var.decls {
        binding_idents(&declarator.name, &mut idents);
      }
    }
    Decl::Fn(function) => idents.push(function.ident.clone()),
    Decl::Class(class) => idents.push(class.ident.clone()),
    Decl::TsEnum(ts_enum) => idents.push(ts_enum.id.clone()),
    Decl::TsModule(ts_module) => {
      if let TsModuleName::Ident(id) = &ts_module.id {
        idents.push(id.clone());
      }
    }
    _ => {}
  }
  idents
}

struct Linker<'a> {
  node: &'a ModuleNode,
  is_entry: bool,
  bindings: &'a HashMap<PathBuf, String>,
  surfaces: &'a HashMap<PathBuf, ExportSurface>,
  externals: &'a mut Externals,
  used_names: UsedNames,
  value_locals: HashSet<Atom>,
  /// Names the entry exports itself, which take precedence over `export *`
  own_exports: HashSet<String>,
  exports: IndexMap<String, Box<Expr>>,
  star_exports: IndexMap<String, Box<Expr>>,
  spreads: Vec<String>,
  surface: ExportSurface,
}

impl Linker<'_> {
  fn error(&self, message: impl Into<String>) -> StageError {
    StageError::new(BUNDLE_STAGE, &self.node.path, message)
  }

  fn items(&self, code: &str) -> Result<Vec<ModuleItem>, StageError> {
    parse_items(code).ok_or_else(|| self.error(format!("Failed to generate {}", code)))
  }

  fn expr(&self, code: &str) -> Result<Box<Expr>, StageError> {
    parse_expr(code).ok_or_else(|| self.error(format!("Failed to generate {}", code)))
  }

  /// The binding and export surface of an internal dependency, `None` for external packages
  fn internal(&self, src: &str) -> Result<Option<(&str, &ExportSurface)>, StageError> {
    let Some(path) = self.node.dependencies.get(src) else {
      return Ok(None);
    };

    let binding = self.bindings.get(path).map(String::as_str);
    let surface = self.surfaces.get(path);
    match (binding, surface) {
      (Some(binding), Some(surface)) => Ok(Some((binding, surface))),
      _ => Err(self.error(format!(
        "{} is part of an import cycle, which a single file can not preserve",
        src
      ))),
    }
  }

  fn collect_value_locals(&mut self, body: &[ModuleItem]) -> Result<(), StageError> {
    for item in body {
      match item {
        ModuleItem::Stmt(Stmt::Decl(decl)) => {
          self
            .value_locals
            .extend(value_names(decl).into_iter().map(|ident| ident.sym));
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
          for ident in value_names(&export.decl) {
            self.own_exports.insert(ident.sym.to_string());
            self.value_locals.insert(ident.sym);
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
          self.own_exports.insert(String::from("default"));
          match &export.decl {
            DefaultDecl::Fn(FnExpr {
              ident: Some(ident), ..
            })
            | DefaultDecl::Class(ClassExpr {
              ident: Some(ident), ..
            }) => {
              self.value_locals.insert(ident.sym.clone());
            }
            _ => {}
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(_)) => {
          self.own_exports.insert(String::from("default"));
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)) if !named.type_only => {
          for specifier in &named.specifiers {
            match specifier {
              ExportSpecifier::Named(specifier) => {
                let exported = specifier.exported.as_ref().unwrap_or(&specifier.orig);
                self.own_exports.insert(export_name(exported).to_string());
              }
              ExportSpecifier::Namespace(namespace) => {
                self
                  .own_exports
                  .insert(export_name(&namespace.name).to_string());
              }
              ExportSpecifier::Default(default) => {
                self.own_exports.insert(default.exported.sym.to_string());
              }
            }
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::Import(import))
          if !import.type_only && !import.specifiers.is_empty() =>
        {
          let internal = self.internal(&import.src.value)?.map(|(_, surface)| surface.clone());
          for specifier in &import.specifiers {
            let is_value = match (specifier, &internal) {
              (ImportSpecifier::Named(named), _) if named.is_type_only => false,
              (ImportSpecifier::Named(named), Some(surface)) => {
                let imported = named
                  .imported
                  .as_ref()
                  .map(export_name)
                  .unwrap_or_else(|| named.local.sym.clone());
                surface.has(&imported)
              }
              (ImportSpecifier::Default(_), Some(surface)) => surface.has("default"),
              _ => true,
            };

            if is_value {
              self.value_locals.insert(specifier.local().sym.clone());
            }
          }
        }
        _ => {}
      }
    }

    Ok(())
  }

  fn link(&mut self, body: Vec<ModuleItem>) -> Result<Vec<ModuleItem>, StageError> {
    self.collect_value_locals(&body)?;

    let mut output = Vec::with_capacity(body.len());
    for item in body {
      match item {
        ModuleItem::ModuleDecl(decl) => self.link_decl(decl, &mut output)?,
        ModuleItem::Stmt(Stmt::Decl(decl)) if !self.is_entry && is_declare(&decl) => {}
        ModuleItem::Stmt(stmt) => output.push(ModuleItem::Stmt(stmt)),
      }
    }

    Ok(output)
  }

  fn export(&mut self, name: &str, value: Box<Expr>) {
    self.surface.names.insert(name.to_string());
    self.exports.insert(name.to_string(), value);
  }

  fn export_local(&mut self, name: &str, local: &Ident) {
    self.export(name, Box::new(Expr::Ident(local.clone())));
  }

  fn link_decl(&mut self, decl: ModuleDecl, output: &mut Vec<ModuleItem>) -> Result<(), StageError> {
    match decl {
      ModuleDecl::Import(import) => {
        if !import.type_only {
          output.extend(self.link_import(&import)?);
        }
      }
      ModuleDecl::ExportDecl(export) if self.is_entry => {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)));
      }
      ModuleDecl::ExportDecl(export) => {
        if is_declare(&export.decl) {
          return Ok(());
        }

        for ident in value_names(&export.decl) {
          self.export_local(&ident.sym.clone(), &ident);
        }
        output.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
      }
      ModuleDecl::ExportDefaultDecl(export) if self.is_entry => {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)));
      }
      ModuleDecl::ExportDefaultDecl(export) => match export.decl {
        DefaultDecl::Fn(FnExpr {
          ident: Some(ident),
          function,
        }) => {
          self.export_local("default", &ident);
          output.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(FnDecl {
            ident,
            declare: false,
            function,
          }))));
        }
        DefaultDecl::Class(ClassExpr {
          ident: Some(ident),
          class,
        }) => {
          self.export_local("default", &ident);
          output.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(ClassDecl {
            ident,
            declare: false,
            class,
          }))));
        }
        DefaultDecl::Fn(function) => {
          output.push(self.default_value(Box::new(Expr::Fn(function))));
        }
        DefaultDecl::Class(class) => {
          output.push(self.default_value(Box::new(Expr::Class(class))));
        }
        DefaultDecl::TsInterfaceDecl(_) => {}
      },
      ModuleDecl::ExportDefaultExpr(export) if self.is_entry => {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)));
      }
      ModuleDecl::ExportDefaultExpr(export) => {
        output.push(self.default_value(export.expr));
      }
      ModuleDecl::ExportNamed(named) => {
        if !named.type_only {
          match &named.src {
            None => self.link_local_exports(named, output),
            Some(src) => {
              let src = src.value.to_string();
              self.link_reexports(&src, named, output)?;
            }
          }
        }
      }
      ModuleDecl::ExportAll(export) => {
        if !export.type_only {
          self.link_star_export(export, output)?;
        }
      }
      other if self.is_entry => output.push(ModuleItem::ModuleDecl(other)),
      _ => {
        return Err(self.error(
          "import = and export = assignments can not be bundled into a single file",
        ))
      }
    }

    Ok(())
  }

  /// `const __default = <expr>;` for anonymous default exports
  fn default_value(&mut self, value: Box<Expr>) -> ModuleItem {
    let local = Ident::new_no_ctxt(self.used_names.fresh("__default"), DUMMY_SP);
    self.export_local("default", &local);

    ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
      span: DUMMY_SP,
      ctxt: SyntaxContext::empty(),
      kind: VarDeclKind::Const,
      declare: false,
      decls: vec![VarDeclarator {
        span: DUMMY_SP,
        name: Pat::Ident(local.into()),
        init: Some(value),
        definite: false,
      }],
    }))))
  }

  fn link_import(&mut self, import: &ImportDecl) -> Result<Vec<ModuleItem>, StageError> {
    let src = import.src.value.to_string();
    if import.specifiers.is_empty() {
      if !self.node.dependencies.contains_key(&src) {
        self.externals.side_effect(&src);
      }
      return Ok(vec![]);
    }

    let internal = self
      .internal(&src)?
      .map(|(binding, surface)| (binding.to_string(), surface.clone()));

    let mut statements = Vec::new();
    let mut destructured = Vec::new();

    for specifier in &import.specifiers {
      let local = &specifier.local().sym;
      if !self.value_locals.contains(local) {
        continue;
      }

      match (specifier, &internal) {
        (ImportSpecifier::Namespace(_), Some((binding, _))) => {
          statements.push(format!("const {} = {};", local, binding));
        }
        (ImportSpecifier::Namespace(_), None) => {
          let namespace = self.externals.namespace(&src);
          statements.push(format!("const {} = {};", local, namespace));
        }
        (ImportSpecifier::Default(_), Some((binding, _))) => {
          statements.push(format!("const {} = {}.default;", local, binding));
        }
        (ImportSpecifier::Default(_), None) => {
          let default = self.externals.default(&src);
          statements.push(format!("const {} = {};", local, default));
        }
        (ImportSpecifier::Named(named), _) => {
          let imported = named
            .imported
            .as_ref()
            .map(export_name)
            .unwrap_or_else(|| local.clone());

          if &*imported == "default" && internal.is_none() {
            let default = self.externals.default(&src);
            statements.push(format!("const {} = {};", local, default));
          } else if &imported == local {
            destructured.push(local.to_string());
          } else if is_identifier_name(&imported) {
            destructured.push(format!("{}: {}", imported, local));
          } else {
            destructured.push(format!("{}: {}", quote(&imported), local));
          }
        }
      }
    }

    if !destructured.is_empty() {
      let object = match &internal {
        Some((binding, _)) => binding.clone(),
        None => self.externals.namespace(&src),
      };
      statements.push(format!("const {{ {} }} = {};", destructured.join(", "), object));
    }

    if statements.is_empty() {
      return Ok(vec![]);
    }

    self.items(&statements.join("\n"))
  }

  fn link_local_exports(&mut self, mut named: NamedExport, output: &mut Vec<ModuleItem>) {
    named.specifiers.retain(|specifier| match specifier {
      ExportSpecifier::Named(specifier) => {
        !specifier.is_type_only
          && matches!(&specifier.orig, ModuleExportName::Ident(orig) if self.value_locals.contains(&orig.sym))
      }
      _ => false,
    });

    if self.is_entry {
      if !named.specifiers.is_empty() {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)));
      }
      return;
    }

    for specifier in named.specifiers {
      if let ExportSpecifier::Named(specifier) = specifier {
        let exported = export_name(specifier.exported.as_ref().unwrap_or(&specifier.orig));
        if let ModuleExportName::Ident(orig) = &specifier.orig {
          self.export_local(&exported, orig);
        }
      }
    }
  }

  /// Re-export under a fresh local, which works for any exported name
  fn entry_reexport(&mut self, exported: &str, value: &str) -> Result<Vec<ModuleItem>, StageError> {
    let local = self.used_names.fresh(&format!("__reexport_{}", sanitize(exported)));
    let exported = if is_identifier_name(exported) {
      exported.to_string()
    } else {
      quote(exported)
    };

    self.items(&format!(
      "const {} = {};\nexport {{ {} as {} }};",
      local, value, local, exported
    ))
  }

  fn link_reexports(
    &mut self,
    src: &str,
    named: NamedExport,
    output: &mut Vec<ModuleItem>,
  ) -> Result<(), StageError> {
    let internal = self
      .internal(src)?
      .map(|(binding, surface)| (binding.to_string(), surface.clone()));

    let Some((binding, surface)) = internal else {
      if self.is_entry {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)));
        return Ok(());
      }

      let namespace = self.externals.namespace(src);
      for specifier in &named.specifiers {
        match specifier {
          ExportSpecifier::Named(specifier) if !specifier.is_type_only => {
            let orig = export_name(&specifier.orig);
            let exported = specifier.exported.as_ref().map(export_name).unwrap_or_else(|| orig.clone());
            let value = if &*orig == "default" {
              self.externals.default(src)
            } else {
              property_access(&namespace, &orig)
            };
            let value = self.expr(&value)?;
            self.export(&exported, value);
          }
          ExportSpecifier::Namespace(specifier) => {
            let value = self.expr(&namespace)?;
            self.export(&export_name(&specifier.name), value);
          }
          _ => {}
        }
      }
      return Ok(());
    };

    for specifier in &named.specifiers {
      let (exported, value) = match specifier {
        ExportSpecifier::Named(specifier) if !specifier.is_type_only => {
          let orig = export_name(&specifier.orig);
          if !surface.has(&orig) {
            continue;
          }

          let exported = specifier.exported.as_ref().map(export_name).unwrap_or_else(|| orig.clone());
          (exported, property_access(&binding, &orig))
        }
        ExportSpecifier::Namespace(specifier) => (export_name(&specifier.name), binding.clone()),
        _ => continue,
      };

      if self.is_entry {
        output.extend(self.entry_reexport(&exported, &value)?);
      } else {
        let value = self.expr(&value)?;
        self.export(&exported, value);
      }
    }

    Ok(())
  }

  fn link_star_export(
    &mut self,
    export: ExportAll,
    output: &mut Vec<ModuleItem>,
  ) -> Result<(), StageError> {
    let src = export.src.value.to_string();
    let internal = self
      .internal(&src)?
      .map(|(binding, surface)| (binding.to_string(), surface.clone()));

    let Some((binding, surface)) = internal else {
      if self.is_entry {
        output.push(ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)));
      } else {
        let namespace = self.externals.namespace(&src);
        self.spreads.push(namespace);
        self.surface.open = true;
      }
      return Ok(());
    };

    if surface.open {
      if self.is_entry {
        tracing::warn!(
          "{} re-exports an external package through {}, only its known names are exported",
          self.node.path.display(),
          src
        );
      } else {
        self.spreads.push(binding.clone());
        self.surface.open = true;
      }
    }

    let names = surface
      .names
      .iter()
      .filter(|name| *name != "default" && !self.own_exports.contains(*name))
      .cloned()
      .collect::<Vec<_>>();

    if self.is_entry {
      let (identifiers, others): (Vec<_>, Vec<_>) =
        names.iter().partition(|name| is_identifier_name(name));

      if !identifiers.is_empty() {
        let identifiers = identifiers
          .iter()
          .map(|name| name.as_str())
          .collect::<Vec<_>>()
          .join(", ");
        output.extend(self.items(&format!("export const {{ {} }} = {};", identifiers, binding))?);
      }

      for name in others {
        let value = property_access(&binding, name);
        output.extend(self.entry_reexport(name, &value)?);
      }
      return Ok(());
    }

    for name in names {
      let value = self.expr(&property_access(&binding, &name))?;
      self.surface.names.insert(name.clone());
      self.star_exports.entry(name).or_insert(value);
    }

    Ok(())
  }

  /// `return { ...spreads, name: value }` closing a wrapped module
  fn return_stmt(&mut self) -> Result<Stmt, StageError> {
    let mut props = Vec::new();
    for spread in &self.spreads {
      props.push(PropOrSpread::Spread(SpreadElement {
        dot3_token: DUMMY_SP,
        expr: self.expr(spread)?,
      }));
    }

    let mut exports = std::mem::take(&mut self.star_exports);
    for (name, value) in std::mem::take(&mut self.exports) {
      exports.insert(name, value);
    }

    for (name, value) in exports {
      let prop = match *value {
        Expr::Ident(ident) if *ident.sym == *name => Prop::Shorthand(ident),
        value => Prop::KeyValue(KeyValueProp {
          key: if is_identifier_name(&name) {
            PropName::Ident(IdentName::new(name.into(), DUMMY_SP))
          } else {
            PropName::Str(Str {
              span: DUMMY_SP,
              value: name.into(),
              raw: None,
            })
          },
          value: Box::new(value),
        }),
      };
      props.push(PropOrSpread::Prop(Box::new(prop)));
    }

    Ok(Stmt::Return(ReturnStmt {
      span: DUMMY_SP,
      arg: Some(Box::new(Expr::Object(ObjectLit {
        span: DUMMY_SP,
        props,
      }))),
    }))
  }
}

/// `const binding = (() => { ...stmts })();`
fn wrap(binding: &str, stmts: Vec<Stmt>) -> ModuleItem {
  let arrow = ArrowExpr {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    params: vec![],
    body: Box::new(BlockStmtOrExpr::BlockStmt(BlockStmt {
      span: DUMMY_SP,
      ctxt: SyntaxContext::empty(),
      stmts,
    })),
    is_async: false,
    is_generator: false,
    type_params: None,
    return_type: None,
  };

  let call = CallExpr {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    callee: Callee::Expr(Box::new(Expr::Paren(ParenExpr {
      span: DUMMY_SP,
      expr: Box::new(Expr::Arrow(arrow)),
    }))),
    args: vec![],
    type_args: None,
  };

  ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    kind: VarDeclKind::Const,
    declare: false,
    decls: vec![VarDeclarator {
      span: DUMMY_SP,
      name: Pat::Ident(Ident::new_no_ctxt(binding.into(), DUMMY_SP).into()),
      init: Some(Box::new(Expr::Call(call))),
      definite: false,
    }],
  }))))
}

/// `import("./lazy")` of a bundled module resolves to its exports
struct DynamicImports<'a> {
  node: &'a ModuleNode,
  bindings: &'a HashMap<PathBuf, String>,
}

impl VisitMut for DynamicImports<'_> {
  fn visit_mut_expr(&mut self, expr: &mut Expr) {
    expr.visit_mut_children_with(self);

    let Expr::Call(call) = expr else {
      return;
    };

    if !matches!(call.callee, Callee::Import(_)) {
      return;
    }

    let binding = match call.args.first().map(|arg| &*arg.expr) {
      Some(Expr::Lit(Lit::Str(src))) => self
        .node
        .dependencies
        .get(&*src.value)
        .and_then(|path| self.bindings.get(path)),
      _ => None,
    };

    if let Some(replacement) =
      binding.and_then(|binding| parse_expr(&format!("Promise.resolve({})", binding)))
    {
      *expr = *replacement;
    }
  }
}

/// Modules reachable from the entry. Modules that are only imported for their side effects are
/// left out unless the target declares that modules have side effects.
fn included_modules(graph: &ModuleGraph, module_side_effects: bool) -> HashSet<PathBuf> {
  let mut included = HashSet::new();
  let mut queue = graph.entry().into_iter().collect::<Vec<_>>();

  while let Some(node) = queue.pop() {
    if !included.insert(node.path.clone()) {
      continue;
    }

    for (specifier, path) in &node.dependencies {
      if !module_side_effects && node.side_effect_only.contains(specifier) {
        continue;
      }

      queue.extend(graph.get(path));
    }
  }

  included
}

/// Link every module of `graph` into one ES module
#[tracing::instrument(level = "debug", skip_all, fields(target = %target.name))]
pub fn bundle(
  graph: &ModuleGraph,
  project_root: &Path,
  target: &TargetDescriptor,
  library: &LibraryInfo,
) -> Result<Bundle, StageError> {
  let paths = graph
    .modules
    .iter()
    .map(|module| module.path.as_path())
    .collect::<Vec<_>>();
  let base = common_base(&paths);

  let bindings = module_bindings(&base, paths.iter().copied());

  let included = included_modules(graph, target.module_side_effects);
  let mut surfaces: HashMap<PathBuf, ExportSurface> = HashMap::new();
  let mut externals = <Externals as Default>::default();
  let mut chunks = Vec::with_capacity(graph.modules.len());
  let specifiers = Default::default();

  for (index, node) in graph.modules.iter().enumerate() {
    let is_entry = index + 1 == graph.modules.len();
    if !included.contains(&node.path) {
      tracing::debug!(
        "Dropped {}, it is only imported for side effects",
        node.path.display()
      );
      continue;
    }

    let ctx = StageContext {
      project_root,
      file_path: &node.path,
      target,
      library,
      specifiers: &specifiers,
    };

    let mut surface = None;
    let output = run_with_transformation(
      BUNDLE_STAGE,
      &ctx,
      &node.code,
      EmitOptions::default(),
      |_, module| {
        let mut linker = Linker {
          node,
          is_entry,
          bindings: &bindings,
          surfaces: &surfaces,
          externals: &mut externals,
          used_names: UsedNames::collect(module),
          value_locals: HashSet::new(),
          own_exports: HashSet::new(),
          exports: IndexMap::new(),
          star_exports: IndexMap::new(),
          spreads: Vec::new(),
          surface: ExportSurface::default(),
        };

        let mut body = linker.link(module.body.take())?;
        for item in body.iter_mut() {
          item.visit_mut_with(&mut DynamicImports {
            node,
            bindings: &bindings,
          });
        }

        if !is_entry {
          let mut stmts = body
            .into_iter()
            .filter_map(|item| match item {
              ModuleItem::Stmt(stmt) => Some(stmt),
              ModuleItem::ModuleDecl(_) => None,
            })
            .collect::<Vec<_>>();
          stmts.push(linker.return_stmt()?);

          body = vec![wrap(&bindings[&node.path], stmts)];
        }

        surface = Some(linker.surface);
        module.body = body;
        Ok(())
      },
    )?;

    if let Some(surface) = surface {
      surfaces.insert(node.path.clone(), surface);
    }

    let map = match output.map {
      MapEffect::Remapped { map } => map,
      _ => SourceMap::identity(project_root, &node.path.to_string_lossy(), &output.code)
        .map_err(|error| StageError::new(BUNDLE_STAGE, &node.path, error.to_string()))?,
    };
    chunks.push((node, output.code, map));
  }

  let mut code = externals.render();
  let mut map = SourceMap::new(project_root);
  for (node, chunk, chunk_map) in chunks {
    map
      .add_sourcemap(&chunk_map, code.lines().count() as i64)
      .map_err(|error| StageError::new(BUNDLE_STAGE, &node.path, error.to_string()))?;
    code.push_str(&chunk);
  }

  tracing::debug!(
    "Bundled {} modules and {} external packages",
    graph.modules.len(),
    externals.sources.len()
  );

  Ok(Bundle { code, map })
}
