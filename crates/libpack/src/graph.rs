use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use swc_core::common::comments::SingleThreadedComments;
use swc_core::common::sync::Lrc;
use swc_core::common::SourceMap;
use swc_core::ecma::ast::{CallExpr, Callee, ExportAll, Expr, ImportDecl, Lit, NamedExport};
use swc_core::ecma::visit::{Visit, VisitWith};

use libpack_core::error::{ResolutionError, StageError, TargetError};
use libpack_filesystem::{normalize_path, FileSystem};
use libpack_stages::runner::parse_module;

/// Extensions tried, in order, for specifiers that name a module without its extension
pub const RESOLVE_EXTENSIONS: [&str; 5] = [".ts", ".tsx", ".mts", ".js", ".mjs"];

/// Reported as the failing stage of parse errors found while resolving the graph
pub const GRAPH_STAGE: &str = "graph";

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleNode {
  pub path: PathBuf,
  pub code: String,
  /// Relative specifiers of this module mapped to the module they resolve to
  pub dependencies: BTreeMap<String, PathBuf>,
  /// Specifiers only ever imported for their side effects, as in `import "./polyfill"`
  pub side_effect_only: BTreeSet<String>,
}

/// Every module statically reachable from an entry, dependencies first
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleGraph {
  pub modules: Vec<ModuleNode>,
}

/// Collects the specifiers a module imports from
#[derive(Default)]
struct ImportCollector {
  specifiers: Vec<String>,
  binding: HashSet<String>,
}

impl ImportCollector {
  fn add(&mut self, specifier: &str, binds: bool) {
    if binds {
      self.binding.insert(specifier.to_string());
    }

    if !self.specifiers.iter().any(|s| s == specifier) {
      self.specifiers.push(specifier.to_string());
    }
  }
}

/// Specifiers a module imports from, in source order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleImports {
  pub specifiers: Vec<String>,
  pub side_effect_only: BTreeSet<String>,
}

impl Visit for ImportCollector {
  fn visit_import_decl(&mut self, node: &ImportDecl) {
    if !node.type_only {
      self.add(&node.src.value, !node.specifiers.is_empty());
    }
  }

  fn visit_named_export(&mut self, node: &NamedExport) {
    if let Some(src) = &node.src {
      if !node.type_only {
        self.add(&src.value, true);
      }
    }
  }

  fn visit_export_all(&mut self, node: &ExportAll) {
    if !node.type_only {
      self.add(&node.src.value, true);
    }
  }

  fn visit_call_expr(&mut self, node: &CallExpr) {
    node.visit_children_with(self);

    if let Callee::Import(_) = node.callee {
      if let Some(Expr::Lit(Lit::Str(src))) = node.args.first().map(|arg| &*arg.expr) {
        self.add(&src.value, true);
      }
    }
  }
}

pub fn is_relative_specifier(specifier: &str) -> bool {
  specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

pub fn collect_imports(path: &Path, code: &str) -> Result<ModuleImports, StageError> {
  let source_map: Lrc<SourceMap> = Default::default();
  let comments = SingleThreadedComments::default();
  let module = parse_module(
    GRAPH_STAGE,
    path,
    code.to_string(),
    &source_map,
    &comments,
  )?;

  let mut collector = ImportCollector::default();
  module.visit_with(&mut collector);

  let side_effect_only = collector
    .specifiers
    .iter()
    .filter(|specifier| !collector.binding.contains(*specifier))
    .cloned()
    .collect();

  Ok(ModuleImports {
    specifiers: collector.specifiers,
    side_effect_only,
  })
}

/// Resolve a relative specifier to a file, `None` if nothing matches
pub fn resolve_specifier(fs: &dyn FileSystem, importer: &Path, specifier: &str) -> Option<PathBuf> {
  let dir = importer.parent().unwrap_or(Path::new("/"));
  let base = normalize_path(dir, Path::new(specifier));
  let base_str = base.to_string_lossy();

  let mut candidates = vec![base.clone()];
  candidates.extend(
    RESOLVE_EXTENSIONS
      .iter()
      .map(|ext| PathBuf::from(format!("{}{}", base_str, ext))),
  );

  // Sources written for ES module runtimes import `./util.js` for `./util.ts`
  for (js, ts) in [(".js", ".ts"), (".mjs", ".mts"), (".jsx", ".tsx")] {
    if let Some(stem) = base_str.strip_suffix(js) {
      candidates.push(PathBuf::from(format!("{}{}", stem, ts)));
    }
  }

  candidates.extend(
    RESOLVE_EXTENSIONS
      .iter()
      .map(|ext| base.join(format!("index{}", ext))),
  );

  candidates.into_iter().find(|candidate| fs.is_file(candidate))
}

impl ModuleGraph {
  /// Walk the imports of `entry` depth first, emitting modules in post-order
  #[tracing::instrument(level = "debug", skip(fs))]
  pub fn resolve(fs: &dyn FileSystem, entry: &Path) -> Result<Self, TargetError> {
    if !fs.is_file(entry) {
      return Err(
        ResolutionError {
          importer: entry.to_path_buf(),
          specifier: entry.to_string_lossy().to_string(),
        }
        .into(),
      );
    }

    let mut walker = Walker {
      fs,
      visited: HashSet::new(),
      modules: Vec::new(),
    };
    walker.visit(entry.to_path_buf())?;

    tracing::debug!("Resolved {} modules", walker.modules.len());
    Ok(Self {
      modules: walker.modules,
    })
  }

  pub fn entry(&self) -> Option<&ModuleNode> {
    self.modules.last()
  }

  pub fn get(&self, path: &Path) -> Option<&ModuleNode> {
    self.modules.iter().find(|module| module.path == path)
  }
}

struct Walker<'a> {
  fs: &'a dyn FileSystem,
  visited: HashSet<PathBuf>,
  modules: Vec<ModuleNode>,
}

impl Walker<'_> {
  fn visit(&mut self, path: PathBuf) -> Result<(), TargetError> {
    // Cycles end here, the module already being walked is emitted after its dependencies
    if !self.visited.insert(path.clone()) {
      return Ok(());
    }

    let code = self
      .fs
      .read_to_string(&path)
      .map_err(|error| StageError::new(GRAPH_STAGE, &path, error.to_string()))?;

    let imports = collect_imports(&path, &code)?;
    let mut dependencies = BTreeMap::new();
    for specifier in imports.specifiers {
      if !is_relative_specifier(&specifier) {
        continue;
      }

      let resolved =
        resolve_specifier(self.fs, &path, &specifier).ok_or_else(|| ResolutionError {
          importer: path.clone(),
          specifier: specifier.clone(),
        })?;

      self.visit(resolved.clone())?;
      dependencies.insert(specifier, resolved);
    }

    let side_effect_only = imports
      .side_effect_only
      .into_iter()
      .filter(|specifier| dependencies.contains_key(specifier))
      .collect();

    self.modules.push(ModuleNode {
      path,
      code,
      dependencies,
      side_effect_only,
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use libpack_filesystem::in_memory_file_system::InMemoryFileSystem;

  use super::*;

  fn file_system(files: &[(&str, &str)]) -> InMemoryFileSystem {
    let fs = InMemoryFileSystem::default();
    for (path, code) in files {
      fs.write(Path::new(path), code.as_bytes()).unwrap();
    }
    fs
  }

  fn paths(graph: &ModuleGraph) -> Vec<&str> {
    graph
      .modules
      .iter()
      .map(|module| module.path.to_str().unwrap())
      .collect()
  }

  #[test]
  fn orders_dependencies_first() {
    let fs = file_system(&[
      (
        "/repo/src/index.ts",
        "import { a } from './a';\nexport * from './b.js';\nexport { a };",
      ),
      ("/repo/src/a.ts", "import { c } from './lib';\nexport const a = c;"),
      ("/repo/src/b.ts", "export const b = 1;"),
      ("/repo/src/lib/index.ts", "export const c = 1;"),
    ]);

    let graph = ModuleGraph::resolve(&fs, Path::new("/repo/src/index.ts")).unwrap();

    assert_eq!(
      paths(&graph),
      vec![
        "/repo/src/lib/index.ts",
        "/repo/src/a.ts",
        "/repo/src/b.ts",
        "/repo/src/index.ts"
      ]
    );
    assert_eq!(
      graph.entry().unwrap().dependencies,
      BTreeMap::from([
        (String::from("./a"), PathBuf::from("/repo/src/a.ts")),
        (String::from("./b.js"), PathBuf::from("/repo/src/b.ts")),
      ])
    );
  }

  #[test]
  fn leaves_bare_and_type_only_specifiers_alone() {
    let fs = file_system(&[(
      "/repo/src/index.ts",
      "import React from 'react';\nimport type { Props } from './missing';\nexport const a = React;",
    )]);

    let graph = ModuleGraph::resolve(&fs, Path::new("/repo/src/index.ts")).unwrap();

    assert_eq!(paths(&graph), vec!["/repo/src/index.ts"]);
    assert!(graph.modules[0].dependencies.is_empty());
  }

  #[test]
  fn tolerates_cycles() {
    let fs = file_system(&[
      ("/repo/src/index.ts", "import './a';"),
      ("/repo/src/a.ts", "import './index';"),
    ]);

    let graph = ModuleGraph::resolve(&fs, Path::new("/repo/src/index.ts")).unwrap();

    assert_eq!(paths(&graph), vec!["/repo/src/a.ts", "/repo/src/index.ts"]);
  }

  #[test]
  fn returns_error_for_unresolvable_specifiers() {
    let fs = file_system(&[("/repo/src/index.ts", "import { a } from './missing';")]);

    let error = ModuleGraph::resolve(&fs, Path::new("/repo/src/index.ts")).unwrap_err();

    assert_eq!(
      error,
      TargetError::Resolution(ResolutionError {
        importer: PathBuf::from("/repo/src/index.ts"),
        specifier: String::from("./missing"),
      })
    );
  }

  #[test]
  fn returns_error_for_syntax_errors() {
    let fs = file_system(&[("/repo/src/index.ts", "export const = 1;")]);

    let error = ModuleGraph::resolve(&fs, Path::new("/repo/src/index.ts")).unwrap_err();

    assert!(matches!(error, TargetError::Stage(StageError { ref stage, .. }) if stage == GRAPH_STAGE));
  }

  #[test]
  fn collects_dynamic_imports() {
    let imports = collect_imports(
      Path::new("/repo/src/index.ts"),
      "export const load = () => import('./lazy');",
    )
    .unwrap();

    assert_eq!(imports.specifiers, vec![String::from("./lazy")]);
    assert!(imports.side_effect_only.is_empty());
  }

  #[test]
  fn marks_side_effect_only_imports() {
    let imports = collect_imports(
      Path::new("/repo/src/index.ts"),
      "import './polyfill';\nimport './styles';\nimport { a } from './styles';",
    )
    .unwrap();

    assert_eq!(
      imports.side_effect_only,
      BTreeSet::from([String::from("./polyfill")])
    );
  }
}
