use std::path::{Path, PathBuf};

use libpack_core::error::ConfigError;
use libpack_core::types::{LibraryInfo, OutputShape, TargetDescriptor};
use libpack_filesystem::{normalize_path, FileSystemRef};

use crate::build_config::BuildConfig;
use crate::config_file::{ConfigFile, LibraryEntry, TargetEntry};

pub const DEFAULT_CONFIG_FILE: &str = "libpack.config.json5";

/// Loads and validates the build configuration
pub struct ConfigLoader {
  fs: FileSystemRef,
}

#[derive(serde::Deserialize)]
struct PackageJson {
  name: Option<String>,
  version: Option<String>,
}

impl ConfigLoader {
  pub fn new(fs: FileSystemRef) -> Self {
    ConfigLoader { fs }
  }

  /// `path` when given, `libpack.config.json5` in the working directory otherwise
  pub fn config_path(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let cwd = self.fs.cwd().map_err(|error| ConfigError::Unreadable {
      path: PathBuf::from("."),
      message: error.to_string(),
    })?;

    Ok(match path {
      Some(path) => normalize_path(&cwd, path),
      None => cwd.join(DEFAULT_CONFIG_FILE),
    })
  }

  /// Read the config at `path` and turn its targets into validated descriptors
  #[tracing::instrument(level = "debug", skip(self, known_stages))]
  pub fn load(&self, path: &Path, known_stages: &[&str]) -> Result<BuildConfig, ConfigError> {
    let raw = self
      .fs
      .read_to_string(path)
      .map_err(|error| ConfigError::Unreadable {
        path: path.to_path_buf(),
        message: error.to_string(),
      })?;

    let file: ConfigFile = serde_json5::from_str(&raw).map_err(|error| malformed(path, error))?;

    let project_root = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("/"));

    let library = self.library_info(&project_root, &file.library)?;
    tracing::debug!(name = %library.name, version = %library.version, "Loaded library info");

    let targets = file
      .targets
      .iter()
      .map(|entry| target_descriptor(&project_root, &library, &file, entry))
      .collect::<Result<Vec<_>, _>>()?;

    for (index, target) in targets.iter().enumerate() {
      if targets[..index].iter().any(|other| other.name == target.name) {
        return Err(ConfigError::InvalidTarget {
          target: target.name.clone(),
          message: String::from("target names must be unique"),
        });
      }

      target.validate(&*self.fs, known_stages)?;
    }

    let config = BuildConfig {
      project_root,
      library,
      targets,
    };

    config.check_outputs()?;
    Ok(config)
  }

  fn library_info(
    &self,
    project_root: &Path,
    library: &LibraryEntry,
  ) -> Result<LibraryInfo, ConfigError> {
    if let (Some(name), Some(version)) = (&library.name, &library.version) {
      return Ok(LibraryInfo::new(name, version));
    }

    let package_json_path = project_root.join("package.json");
    let package_json = match self.fs.read_to_string(&package_json_path) {
      Ok(raw) => serde_json::from_str::<PackageJson>(&raw).map_err(|error| {
        ConfigError::Malformed {
          path: package_json_path.clone(),
          message: error.to_string(),
        }
      })?,
      Err(_) => PackageJson {
        name: None,
        version: None,
      },
    };

    let name = library.name.clone().or_else(|| {
      package_json
        .name
        .map(|name| name.rsplit('/').next().unwrap_or(&name).to_string())
    });

    let version = library.version.clone().or(package_json.version);

    match (name, version) {
      (Some(name), Some(version)) => Ok(LibraryInfo::new(name, version)),
      (None, _) => Err(ConfigError::Malformed {
        path: package_json_path,
        message: String::from("library.name is not set and package.json has no name"),
      }),
      (_, None) => Err(ConfigError::Malformed {
        path: package_json_path,
        message: String::from("library.version is not set and package.json has no version"),
      }),
    }
  }
}

fn malformed(path: &Path, error: serde_json5::Error) -> ConfigError {
  let message = match error {
    serde_json5::Error::Message {
      msg,
      location: Some(location),
    } => format!("{} at {}:{}", msg, location.line, location.column),
    serde_json5::Error::Message { msg, location: None } => msg,
  };

  ConfigError::Malformed {
    path: path.to_path_buf(),
    message,
  }
}

fn target_descriptor(
  project_root: &Path,
  library: &LibraryInfo,
  file: &ConfigFile,
  entry: &TargetEntry,
) -> Result<TargetDescriptor, ConfigError> {
  let resolve = |path: &str| normalize_path(project_root, Path::new(&library.substitute(path)));

  let (output, shape) = match (&entry.dir, &entry.file) {
    (Some(dir), None) => (resolve(dir), OutputShape::PerModule),
    (None, Some(file)) => (resolve(file), OutputShape::SingleFile),
    _ => {
      return Err(ConfigError::InvalidTarget {
        target: entry.name.clone().unwrap_or_else(|| entry.entry.display().to_string()),
        message: String::from("exactly one of dir and file must be set"),
      })
    }
  };

  let name = entry.name.clone().unwrap_or_else(|| {
    output
      .strip_prefix(project_root)
      .unwrap_or(&output)
      .to_string_lossy()
      .replace('\\', "/")
  });

  match (shape, entry.preserve_modules) {
    (OutputShape::PerModule, Some(false)) => {
      return Err(ConfigError::InvalidTarget {
        target: name,
        message: String::from("dir outputs preserve modules, use file to bundle"),
      })
    }
    (OutputShape::SingleFile, Some(true)) => {
      return Err(ConfigError::InvalidTarget {
        target: name,
        message: String::from("file outputs can not preserve modules, use dir instead"),
      })
    }
    _ => {}
  }

  let mut env = file.env.clone();
  env.extend(entry.env.clone());

  let version_tag = entry
    .version_tag
    .clone()
    .or_else(|| file.version_tag.clone());

  Ok(TargetDescriptor {
    name,
    entry: resolve(&entry.entry.to_string_lossy()),
    output,
    shape,
    format: entry.format,
    minify: entry.minify,
    sourcemap: entry.sourcemap,
    stages: entry
      .stages
      .clone()
      .unwrap_or_else(|| TargetDescriptor::default_stages(entry.format, entry.minify)),
    env,
    version_tag,
    module_side_effects: entry
      .module_side_effects
      .or(file.module_side_effects)
      .unwrap_or(false),
    entry_file_names: entry
      .entry_file_names
      .clone()
      .unwrap_or_else(|| String::from("[name].js")),
  })
}
