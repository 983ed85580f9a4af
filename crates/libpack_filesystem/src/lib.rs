use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// In-memory file-system for testing
pub mod in_memory_file_system;

/// File-system implementation using std::fs
pub mod os_file_system;

/// FileSystem abstraction instance
///
/// This should be `OsFileSystem` for non-testing environments and `InMemoryFileSystem` for testing.
pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

/// Trait abstracting the file-system operations a build needs.
///
/// Reads cover the source tree, writes cover emitted artifacts and the persistent cache.
#[mockall::automock]
pub trait FileSystem: std::fmt::Debug {
  fn cwd(&self) -> io::Result<PathBuf> {
    Err(io::Error::other("Not implemented: FileSystem::cwd"))
  }

  /// Make a path absolute and remove `.` and `..` components, without touching symlinks
  fn canonicalize_base(&self, path: &Path) -> io::Result<PathBuf> {
    let cwd = self.cwd()?;
    Ok(normalize_path(&cwd, path))
  }

  /// Create a directory at the specified path, including missing parents
  fn create_dir_all(&self, path: &Path) -> io::Result<()>;

  fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
  fn read_to_string(&self, path: &Path) -> io::Result<String>;
  fn is_file(&self, path: &Path) -> bool;
  fn is_dir(&self, path: &Path) -> bool;

  /// Write a file, replacing its previous contents
  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

  /// Move a file over another one. Replacing the destination is atomic on the OS implementation.
  fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

  fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Lexically join `path` onto `cwd` and resolve `.` and `..` components
pub fn normalize_path(cwd: &Path, path: &Path) -> PathBuf {
  use std::path::Component;

  let mut result: Vec<Component<'_>> = if path.is_absolute() {
    vec![]
  } else {
    cwd.components().collect()
  };

  for component in path.components() {
    match component {
      Component::Prefix(prefix) => {
        result = vec![Component::Prefix(prefix)];
      }
      Component::RootDir => {
        result.push(Component::RootDir);
      }
      Component::CurDir => {}
      Component::ParentDir => {
        if !matches!(
          result.last(),
          Some(Component::RootDir) | Some(Component::Prefix(_)) | None
        ) {
          result.pop();
        }
      }
      Component::Normal(path) => {
        result.push(Component::Normal(path));
      }
    }
  }

  PathBuf::from_iter(result)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn normalize_path_joins_relative_paths() {
    assert_eq!(
      normalize_path(Path::new("/repo"), Path::new("./src/../lib/index.ts")),
      PathBuf::from("/repo/lib/index.ts")
    );
  }

  #[test]
  fn normalize_path_keeps_absolute_paths() {
    assert_eq!(
      normalize_path(Path::new("/repo"), Path::new("/other/./a.ts")),
      PathBuf::from("/other/a.ts")
    );
  }

  #[test]
  fn normalize_path_does_not_escape_the_root() {
    assert_eq!(
      normalize_path(Path::new("/"), Path::new("../../a.ts")),
      PathBuf::from("/a.ts")
    );
  }

  #[test]
  fn mocked_file_system_can_stub_reads() {
    let mut fs = MockFileSystem::new();
    fs.expect_read_to_string()
      .returning(|_| Ok(String::from("export {};")));

    assert_eq!(
      fs.read_to_string(Path::new("/a.ts")).unwrap(),
      String::from("export {};")
    );
  }
}
