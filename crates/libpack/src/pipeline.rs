use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use libpack_core::error::{StageError, TargetError};
use libpack_core::stage::{names, MapEffect, StageContext};
use libpack_core::types::{LibraryInfo, OutputShape, TargetDescriptor};
use libpack_filesystem::{normalize_path, FileSystem};
use libpack_sourcemap::{SourceMap, SourceMapError};
use libpack_stages::StageRc;

use crate::bundle::{bundle, common_base};
use crate::graph::{ModuleGraph, ModuleNode};
use crate::stage_cache::StageCache;

/// Where a target is in its build. Targets move through these strictly in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TargetState {
  Pending,
  Resolving,
  Transforming { index: usize, stage: String },
  Emitting,
  Done,
  Failed,
}

impl Display for TargetState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TargetState::Pending => write!(f, "pending"),
      TargetState::Resolving => write!(f, "resolving"),
      TargetState::Transforming { index, stage } => write!(f, "transforming({} {})", index, stage),
      TargetState::Emitting => write!(f, "emitting"),
      TargetState::Done => write!(f, "done"),
      TargetState::Failed => write!(f, "failed"),
    }
  }
}

/// Outcome of one target
#[derive(Debug, PartialEq)]
pub struct TargetReport {
  pub name: String,
  pub state: TargetState,
  /// Every state the target went through, starting with `Pending`
  pub transitions: Vec<TargetState>,
  /// Files written, source maps included
  pub outputs: Vec<PathBuf>,
  pub error: Option<TargetError>,
  pub duration: Duration,
}

impl TargetReport {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      state: TargetState::Pending,
      transitions: vec![TargetState::Pending],
      outputs: Vec::new(),
      error: None,
      duration: Duration::default(),
    }
  }

  pub fn transition(&mut self, state: TargetState) {
    if self.state == state {
      return;
    }

    tracing::debug!(target = %self.name, "{} -> {}", self.state, state);
    self.transitions.push(state.clone());
    self.state = state;
  }

  pub fn fail(&mut self, error: TargetError) {
    tracing::error!(target = %self.name, "{}", error);
    self.transition(TargetState::Failed);
    self.error = Some(error);
  }

  pub fn is_done(&self) -> bool {
    self.state == TargetState::Done
  }
}

/// Source map of one output, composed stage after stage onto the original sources
#[derive(Clone, Debug)]
pub struct MapChain {
  project_root: PathBuf,
  /// The file the stage input is read from, while no stage has remapped it yet
  source: String,
  map: Option<SourceMap>,
}

impl MapChain {
  pub fn new(project_root: &Path, source: &Path) -> Self {
    Self {
      project_root: project_root.to_path_buf(),
      source: source.to_string_lossy().to_string(),
      map: None,
    }
  }

  /// Continue from a map of the initial code
  pub fn with_map(mut self, map: SourceMap) -> Self {
    self.map = Some(map);
    self
  }

  /// Compose the effect of a stage that ran over `input`
  pub fn apply(&mut self, effect: MapEffect, input: &str) -> Result<(), SourceMapError> {
    match effect {
      MapEffect::Unchanged => {}
      MapEffect::Remapped { mut map } => {
        if let Some(previous) = &self.map {
          map.extends(previous)?;
        }
        self.map = Some(map);
      }
      MapEffect::Shifted { lines } => {
        let mut map = match self.map.take() {
          Some(map) => map,
          None => SourceMap::identity(&self.project_root, &self.source, input)?,
        };
        map.offset_lines(0, lines as i64)?;
        self.map = Some(map);
      }
    }

    Ok(())
  }

  pub fn finish(self, code: &str) -> Result<SourceMap, SourceMapError> {
    match self.map {
      Some(map) => Ok(map),
      None => SourceMap::identity(&self.project_root, &self.source, code),
    }
  }
}

/// The content of one output file
#[derive(Clone, Debug)]
pub struct Artifact {
  pub path: PathBuf,
  pub code: String,
  pub map: Option<SourceMap>,
}

/// A file being built
struct Unit {
  /// Module path for per-module targets, output file for single-file targets
  file_path: PathBuf,
  output: PathBuf,
  code: String,
  map: MapChain,
  specifiers: BTreeMap<String, String>,
}

/// A stage chain and the files it runs over
struct Variant {
  target: TargetDescriptor,
  stages: Vec<StageRc>,
  units: Vec<Unit>,
}

/// Relative specifier of `to` as imported from the file `from`
fn relative_specifier(from: &Path, to: &Path) -> String {
  let dir = from.parent().unwrap_or(Path::new("/"));
  let relative = pathdiff::diff_paths(to, dir).unwrap_or_else(|| to.to_path_buf());
  let relative = relative
    .components()
    .map(|component| component.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/");

  if relative.starts_with("../") {
    relative
  } else {
    format!("./{}", relative)
  }
}

/// Runs the stages of one target over its module graph
pub struct Pipeline<'a> {
  pub fs: &'a dyn FileSystem,
  pub project_root: &'a Path,
  pub library: &'a LibraryInfo,
  pub target: &'a TargetDescriptor,
  /// Instances of the target's stages, in declaration order
  pub stages: &'a [StageRc],
  pub cache: &'a StageCache,
}

impl Pipeline<'_> {
  /// Resolve, bundle when needed and transform, returning the artifacts to write
  #[tracing::instrument(level = "info", skip_all, fields(target = %self.target.name))]
  pub fn run(&self, report: &mut TargetReport) -> Result<Vec<Artifact>, TargetError> {
    report.transition(TargetState::Resolving);
    let graph = ModuleGraph::resolve(self.fs, &self.target.entry)?;

    let variants = match self.target.shape {
      OutputShape::PerModule => vec![self.per_module(&graph)],
      OutputShape::SingleFile => self.single_file(&graph)?,
    };

    let mut artifacts = Vec::new();
    for mut variant in variants {
      for (index, stage) in variant.stages.iter().enumerate() {
        report.transition(TargetState::Transforming {
          index,
          stage: stage.name().to_string(),
        });

        for unit in variant.units.iter_mut() {
          self.run_stage(stage, &variant.target, unit)?;
        }
      }

      for unit in variant.units {
        artifacts.push(self.finish(unit, &graph)?);
      }
    }

    Ok(artifacts)
  }

  fn run_stage(
    &self,
    stage: &StageRc,
    target: &TargetDescriptor,
    unit: &mut Unit,
  ) -> Result<(), StageError> {
    let ctx = StageContext {
      project_root: self.project_root,
      file_path: &unit.file_path,
      target,
      library: self.library,
      specifiers: &unit.specifiers,
    };

    let output = self.cache.run(stage.as_ref(), &ctx, &unit.code)?;
    if self.target.sourcemap {
      unit
        .map
        .apply(output.map, &unit.code)
        .map_err(|error| StageError::new(stage.name(), &unit.file_path, error.to_string()))?;
    }

    unit.code = output.code;
    Ok(())
  }

  fn per_module(&self, graph: &ModuleGraph) -> Variant {
    let paths = graph
      .modules
      .iter()
      .map(|module| module.path.as_path())
      .collect::<Vec<_>>();
    let base = common_base(&paths);

    let outputs = graph
      .modules
      .iter()
      .map(|module| (module.path.clone(), self.module_output(&base, module)))
      .collect::<HashMap<_, _>>();

    let units = graph
      .modules
      .iter()
      .map(|module| {
        let output = outputs[&module.path].clone();
        let specifiers = module
          .dependencies
          .iter()
          .map(|(specifier, path)| (specifier.clone(), relative_specifier(&output, &outputs[path])))
          .collect();

        Unit {
          file_path: module.path.clone(),
          output,
          code: module.code.clone(),
          map: MapChain::new(self.project_root, &module.path),
          specifiers,
        }
      })
      .collect();

    Variant {
      target: self.target.clone(),
      stages: self.stages.to_vec(),
      units,
    }
  }

  /// `<output dir>/<entry file names>` with `[name]` replaced by the module path relative to
  /// the common base directory of all modules
  fn module_output(&self, base: &Path, module: &ModuleNode) -> PathBuf {
    let relative = module
      .path
      .strip_prefix(base)
      .unwrap_or(&module.path)
      .with_extension("");
    let name = relative
      .components()
      .map(|component| component.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");

    normalize_path(
      &self.target.output,
      Path::new(&self.target.entry_file_names.replace("[name]", &name)),
    )
  }

  fn single_file(&self, graph: &ModuleGraph) -> Result<Vec<Variant>, TargetError> {
    let bundle = bundle(graph, self.project_root, self.target, self.library)?;

    let unit = |output: &Path| Unit {
      file_path: output.to_path_buf(),
      output: output.to_path_buf(),
      code: bundle.code.clone(),
      map: MapChain::new(self.project_root, output).with_map(bundle.map.clone()),
      specifiers: BTreeMap::new(),
    };

    let Some(sibling) = self.target.minified_sibling() else {
      return Ok(vec![Variant {
        target: self.target.clone(),
        stages: self.stages.to_vec(),
        units: vec![unit(&self.target.output)],
      }]);
    };

    // The declared file gets the same chain without minification
    let mut unminified = self.target.clone();
    unminified.minify = false;
    unminified.stages.retain(|stage| stage.name != names::MINIFY);

    Ok(vec![
      Variant {
        target: unminified,
        stages: self
          .stages
          .iter()
          .filter(|stage| stage.name() != names::MINIFY)
          .cloned()
          .collect(),
        units: vec![unit(&self.target.output)],
      },
      Variant {
        target: self.target.clone(),
        stages: self.stages.to_vec(),
        units: vec![unit(&sibling)],
      },
    ])
  }

  fn finish(&self, unit: Unit, graph: &ModuleGraph) -> Result<Artifact, TargetError> {
    let map = if self.target.sourcemap {
      let mut map = unit
        .map
        .finish(&unit.code)
        .and_then(|mut map| {
          self.attach_sources(&mut map, graph)?;
          Ok(map)
        })
        .map_err(|error| StageError::new("sourcemap", &unit.output, error.to_string()))?;

      map.relativize_sources(unit.output.parent().unwrap_or(self.project_root));
      Some(map)
    } else {
      None
    };

    Ok(Artifact {
      path: unit.output,
      code: unit.code,
      map,
    })
  }

  /// Embed the original code of every module the map points at
  fn attach_sources(&self, map: &mut SourceMap, graph: &ModuleGraph) -> Result<(), SourceMapError> {
    let sources = map.get_sources().clone();
    for (index, source) in sources.iter().enumerate() {
      let path = normalize_path(self.project_root, Path::new(source));
      if let Some(module) = graph.get(&path) {
        map.set_source_content(index, &module.code)?;
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use libpack_core::types::{OutputFormat, StageRef, TargetDescriptorBuilder};
  use libpack_filesystem::in_memory_file_system::InMemoryFileSystem;
  use libpack_stages::StageRegistry;

  use super::*;

  fn file_system(files: &[(&str, &str)]) -> InMemoryFileSystem {
    let fs = InMemoryFileSystem::default();
    for (path, code) in files {
      fs.write(Path::new(path), code.as_bytes()).unwrap();
    }
    fs
  }

  fn try_run(
    fs: &InMemoryFileSystem,
    target: &TargetDescriptor,
  ) -> (TargetReport, Result<Vec<Artifact>, TargetError>) {
    let stages = StageRegistry::default()
      .create_all(&target.stages, &target.name)
      .unwrap();
    let library = LibraryInfo::new("mylib", "1.0.0");
    let cache = StageCache::disabled();

    let pipeline = Pipeline {
      fs,
      project_root: Path::new("/repo"),
      library: &library,
      target,
      stages: &stages,
      cache: &cache,
    };

    let mut report = TargetReport::new(&target.name);
    let result = pipeline.run(&mut report);
    (report, result)
  }

  fn run(fs: &InMemoryFileSystem, target: &TargetDescriptor) -> (TargetReport, Vec<Artifact>) {
    let (report, result) = try_run(fs, target);
    (report, result.unwrap())
  }

  fn per_module_target() -> TargetDescriptor {
    TargetDescriptorBuilder::default()
      .name("esm")
      .entry("/repo/src/index.ts")
      .output("/repo/dist")
      .shape(OutputShape::PerModule)
      .stages(TargetDescriptor::default_stages(OutputFormat::EsModule, false))
      .version_tag("<LIBRARY_NAME> @{version}")
      .entry_file_names("[name].js")
      .build()
      .unwrap()
  }

  #[test]
  fn per_module_targets_emit_one_file_per_module() {
    let fs = file_system(&[
      (
        "/repo/src/index.ts",
        "export { add } from './math';\nexport const VERSION: string = \"1.0.0\";\n",
      ),
      (
        "/repo/src/math.ts",
        "export const add = (a: number, b: number): number => a + b;\n",
      ),
    ]);

    let (report, artifacts) = run(&fs, &per_module_target());

    let paths = artifacts.iter().map(|a| a.path.clone()).collect::<Vec<_>>();
    assert_eq!(
      paths,
      vec![
        PathBuf::from("/repo/dist/math.js"),
        PathBuf::from("/repo/dist/index.js")
      ]
    );
    assert_eq!(
      artifacts[1].code,
      "/* mylib @1.0.0 */\nexport { add } from './math.js';\nexport const VERSION = '1.0.0';\n"
    );
    assert_eq!(
      report.transitions[..3],
      [
        TargetState::Pending,
        TargetState::Resolving,
        TargetState::Transforming {
          index: 0,
          stage: String::from("replace")
        }
      ]
    );
  }

  #[test]
  fn specifiers_point_between_output_files() {
    assert_eq!(
      relative_specifier(Path::new("/dist/index.js"), Path::new("/dist/utils/math.js")),
      "./utils/math.js"
    );
    assert_eq!(
      relative_specifier(Path::new("/dist/utils/math.js"), Path::new("/dist/index.js")),
      "../index.js"
    );
  }

  #[test]
  fn single_file_minified_targets_also_write_the_unminified_file() {
    let fs = file_system(&[(
      "/repo/src/index.ts",
      "export const VERSION = \"1.0.0\";\n",
    )]);

    let target = TargetDescriptorBuilder::default()
      .name("bundle")
      .entry("/repo/src/index.ts")
      .output("/repo/dist/mylib.js")
      .shape(OutputShape::SingleFile)
      .minify(true)
      .stages(TargetDescriptor::default_stages(OutputFormat::EsModule, true))
      .build()
      .unwrap();

    let (_, artifacts) = run(&fs, &target);

    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].path, PathBuf::from("/repo/dist/mylib.js"));
    assert_eq!(
      artifacts[0].code,
      "/* mylib @1.0.0 */\nexport const VERSION = '1.0.0';\n"
    );
    assert_eq!(artifacts[1].path, PathBuf::from("/repo/dist/mylib.min.js"));
    assert!(artifacts[1].code.starts_with("/* mylib @1.0.0 */\n"));
    assert!(artifacts[1].code.contains("1.0.0"));
    assert!(!artifacts[1].code.contains("\n  "));
  }

  #[test]
  fn maps_trace_back_through_every_stage() {
    let fs = file_system(&[(
      "/repo/src/index.ts",
      "interface Options {\n  debug: boolean;\n}\n\nexport const VERSION: string = \"1.0.0\";\n",
    )]);

    let mut target = per_module_target();
    target.sourcemap = true;

    let (_, artifacts) = run(&fs, &target);
    let map = artifacts[0].map.as_ref().unwrap();

    // Line 0 is the version tag
    let (source, location) = map.original_position_for(1, 0).unwrap();
    assert_eq!(source, "../src/index.ts");
    assert_eq!(location.original_line, 4);
    assert_eq!(map.get_sources_content()[0], fs.read_to_string(Path::new("/repo/src/index.ts")).unwrap());
  }

  #[test]
  fn parse_errors_stop_the_target_while_resolving() {
    let fs = file_system(&[("/repo/src/index.ts", "export const = 1;\n")]);
    let target = TargetDescriptor {
      stages: vec![StageRef::new(names::TYPESCRIPT)],
      ..per_module_target()
    };

    let (report, result) = try_run(&fs, &target);

    assert!(matches!(result, Err(TargetError::Stage(_))));
    assert_eq!(report.state, TargetState::Resolving);
  }

  #[test]
  fn stage_errors_stop_the_target_at_the_failing_stage() {
    let fs = file_system(&[(
      "/repo/src/index.ts",
      "export const VERSION: string = \"1.0.0\";\n",
    )]);
    let target = TargetDescriptor {
      version_tag: Some(String::from("<LIBRARY_NAME> */ @{version}")),
      ..per_module_target()
    };

    let (mut report, result) = try_run(&fs, &target);
    let error = result.unwrap_err();
    let TargetError::Stage(StageError { ref stage, ref file, .. }) = error else {
      panic!("expected a stage error, got {:?}", error);
    };
    assert_eq!(stage, names::VERSION_TAG);
    assert_eq!(file, Path::new("/repo/src/index.ts"));

    report.fail(error);

    let failing = TargetState::Transforming {
      index: 4,
      stage: String::from(names::VERSION_TAG),
    };
    assert_eq!(report.state, TargetState::Failed);
    assert_eq!(
      report.transitions[report.transitions.len() - 2..],
      [failing, TargetState::Failed]
    );
    assert!(!report.transitions.contains(&TargetState::Emitting));
  }
}
