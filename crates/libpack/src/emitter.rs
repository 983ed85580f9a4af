use std::path::{Path, PathBuf};

use libpack_core::error::EmitError;
use libpack_filesystem::FileSystem;

use crate::pipeline::Artifact;

/// Writes the artifacts of one target.
///
/// Every file is written to a temporary sibling first and only renamed into place once all
/// of them were written. Source maps are renamed before any code file, so a code file never
/// lands at its final path pointing at a map that is missing.
pub struct Emitter<'a> {
  fs: &'a dyn FileSystem,
}

struct PendingFile {
  path: PathBuf,
  is_map: bool,
  temp_path: PathBuf,
  contents: Vec<u8>,
}

fn temp_path(path: &Path) -> PathBuf {
  let file_name = path
    .file_name()
    .map(|name| name.to_string_lossy().to_string())
    .unwrap_or_default();

  path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

fn map_path(path: &Path) -> PathBuf {
  let mut file_name = path.file_name().unwrap_or_default().to_os_string();
  file_name.push(".map");
  path.with_file_name(file_name)
}

impl<'a> Emitter<'a> {
  pub fn new(fs: &'a dyn FileSystem) -> Self {
    Self { fs }
  }

  /// The files an artifact is written as, source map included
  fn files(&self, artifact: &Artifact) -> Result<Vec<PendingFile>, EmitError> {
    let mut files = Vec::with_capacity(2);

    let Some(map) = &artifact.map else {
      files.push(PendingFile {
        path: artifact.path.clone(),
        is_map: false,
        temp_path: temp_path(&artifact.path),
        contents: artifact.code.clone().into_bytes(),
      });
      return Ok(files);
    };

    let path = map_path(&artifact.path);
    let file_name = artifact
      .path
      .file_name()
      .map(|name| name.to_string_lossy().to_string())
      .unwrap_or_default();

    let json = map.to_json(Some(&file_name)).map_err(|error| EmitError {
      path: path.clone(),
      message: error.to_string(),
    })?;

    let mut code = artifact.code.clone();
    if !code.ends_with('\n') {
      code.push('\n');
    }
    code.push_str(&format!("//# sourceMappingURL={}.map\n", file_name));

    files.push(PendingFile {
      path: artifact.path.clone(),
      is_map: false,
      temp_path: temp_path(&artifact.path),
      contents: code.into_bytes(),
    });
    files.push(PendingFile {
      temp_path: temp_path(&path),
      path,
      is_map: true,
      contents: json.into_bytes(),
    });

    Ok(files)
  }

  fn remove_temporaries<'f>(&self, files: impl IntoIterator<Item = &'f PendingFile>) {
    for file in files {
      if self.fs.is_file(&file.temp_path) {
        if let Err(error) = self.fs.remove_file(&file.temp_path) {
          tracing::warn!("Failed to remove {}: {}", file.temp_path.display(), error);
        }
      }
    }
  }

  /// Write every artifact and return the paths written, in order
  #[tracing::instrument(level = "debug", skip_all)]
  pub fn emit(&self, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, EmitError> {
    let mut files = Vec::new();
    for artifact in artifacts {
      files.extend(self.files(artifact)?);
    }

    for (index, file) in files.iter().enumerate() {
      let written = match file.path.parent() {
        Some(parent) => self.fs.create_dir_all(parent),
        None => Ok(()),
      }
      .and_then(|_| self.fs.write(&file.temp_path, &file.contents));

      if let Err(error) = written {
        self.remove_temporaries(&files[..=index]);
        return Err(EmitError {
          path: file.path.clone(),
          message: error.to_string(),
        });
      }
    }

    let renames = files
      .iter()
      .filter(|file| file.is_map)
      .chain(files.iter().filter(|file| !file.is_map))
      .collect::<Vec<_>>();

    for (index, file) in renames.iter().enumerate() {
      if let Err(error) = self.fs.rename(&file.temp_path, &file.path) {
        self.remove_temporaries(renames[index..].iter().copied());
        return Err(EmitError {
          path: file.path.clone(),
          message: error.to_string(),
        });
      }

      tracing::debug!("Wrote {}", file.path.display());
    }

    Ok(files.into_iter().map(|file| file.path).collect())
  }
}

#[cfg(test)]
mod tests {
  use std::io;
  use std::sync::{Arc, Mutex};

  use pretty_assertions::assert_eq;

  use libpack_filesystem::in_memory_file_system::InMemoryFileSystem;
  use libpack_filesystem::MockFileSystem;
  use libpack_sourcemap::SourceMap;

  use super::*;

  fn artifact(path: &str, code: &str) -> Artifact {
    Artifact {
      path: PathBuf::from(path),
      code: code.to_string(),
      map: None,
    }
  }

  #[test]
  fn writes_artifacts_to_their_paths() {
    let fs = InMemoryFileSystem::default();

    let written = Emitter::new(&fs)
      .emit(&[
        artifact("/repo/dist/index.js", "export {};\n"),
        artifact("/repo/dist/utils/math.js", "export const add = 1;\n"),
      ])
      .unwrap();

    assert_eq!(
      written,
      vec![
        PathBuf::from("/repo/dist/index.js"),
        PathBuf::from("/repo/dist/utils/math.js")
      ]
    );
    assert_eq!(
      fs.read_to_string(Path::new("/repo/dist/utils/math.js")).unwrap(),
      "export const add = 1;\n"
    );
    assert_eq!(fs.files().len(), 2);
  }

  #[test]
  fn writes_source_maps_next_to_their_files() {
    let fs = InMemoryFileSystem::default();
    let code = "export const a = 1;\n";
    let map = SourceMap::identity(Path::new("/repo"), "/repo/src/index.ts", code).unwrap();

    Emitter::new(&fs)
      .emit(&[Artifact {
        path: PathBuf::from("/repo/dist/index.js"),
        code: code.to_string(),
        map: Some(map),
      }])
      .unwrap();

    assert_eq!(
      fs.read_to_string(Path::new("/repo/dist/index.js")).unwrap(),
      "export const a = 1;\n//# sourceMappingURL=index.js.map\n"
    );

    let json: serde_json::Value = serde_json::from_str(
      &fs
        .read_to_string(Path::new("/repo/dist/index.js.map"))
        .unwrap(),
    )
    .unwrap();
    assert_eq!(json["file"], "index.js");
    assert_eq!(json["version"], 3);
  }

  #[test]
  fn removes_temporaries_when_a_write_fails() {
    let mut fs = MockFileSystem::new();
    fs.expect_create_dir_all().returning(|_| Ok(()));
    fs.expect_write()
      .withf(|path, _| path.to_string_lossy().contains(".a.js."))
      .returning(|_, _| Ok(()));
    fs.expect_write()
      .withf(|path, _| path.to_string_lossy().contains(".b.js."))
      .returning(|_, _| Err(io::Error::other("disk full")));
    fs.expect_is_file().returning(|path| path.to_string_lossy().contains(".a.js."));
    fs.expect_remove_file()
      .withf(|path| path.to_string_lossy().contains(".a.js."))
      .times(1)
      .returning(|_| Ok(()));
    fs.expect_rename().never();

    let error = Emitter::new(&fs)
      .emit(&[
        artifact("/repo/dist/a.js", "a();\n"),
        artifact("/repo/dist/b.js", "b();\n"),
      ])
      .unwrap_err();

    assert_eq!(
      error,
      EmitError {
        path: PathBuf::from("/repo/dist/b.js"),
        message: String::from("disk full"),
      }
    );
  }

  #[test]
  fn renames_source_maps_before_code_files() {
    let renamed = Arc::new(Mutex::new(Vec::new()));
    let code_temp = temp_path(Path::new("/repo/dist/index.js"));

    let mut fs = MockFileSystem::new();
    fs.expect_create_dir_all().returning(|_| Ok(()));
    fs.expect_write().returning(|_, _| Ok(()));
    fs.expect_rename().returning({
      let renamed = renamed.clone();
      move |_, to| {
        renamed.lock().unwrap().push(to.to_path_buf());
        if to.extension().is_some_and(|extension| extension == "js") {
          Err(io::Error::other("permission denied"))
        } else {
          Ok(())
        }
      }
    });
    fs.expect_is_file().returning({
      let code_temp = code_temp.clone();
      move |path| path.to_path_buf() == code_temp
    });
    fs.expect_remove_file()
      .withf(move |path| path.to_path_buf() == code_temp)
      .times(1)
      .returning(|_| Ok(()));

    let code = "export const a = 1;\n";
    let map = SourceMap::identity(Path::new("/repo"), "/repo/src/index.ts", code).unwrap();
    let error = Emitter::new(&fs)
      .emit(&[Artifact {
        path: PathBuf::from("/repo/dist/index.js"),
        code: code.to_string(),
        map: Some(map),
      }])
      .unwrap_err();

    assert_eq!(
      error,
      EmitError {
        path: PathBuf::from("/repo/dist/index.js"),
        message: String::from("permission denied"),
      }
    );
    assert_eq!(
      *renamed.lock().unwrap(),
      vec![
        PathBuf::from("/repo/dist/index.js.map"),
        PathBuf::from("/repo/dist/index.js")
      ]
    );
  }

  #[test]
  fn map_paths_append_the_extension() {
    assert_eq!(
      map_path(Path::new("/repo/dist/mylib.min.js")),
      PathBuf::from("/repo/dist/mylib.min.js.map")
    );
  }
}
