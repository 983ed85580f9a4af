use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::normalize_path;
use crate::FileSystem;

#[cfg(not(target_os = "windows"))]
fn root_dir() -> PathBuf {
  PathBuf::from("/")
}

#[cfg(target_os = "windows")]
fn root_dir() -> PathBuf {
  PathBuf::from("C:/")
}

#[derive(Debug, Clone)]
enum InMemoryFileSystemEntry {
  File { contents: Vec<u8> },
  Directory,
}

/// In memory implementation of the `FileSystem` trait, for testing purposes.
#[derive(Debug)]
pub struct InMemoryFileSystem {
  files: RwLock<HashMap<PathBuf, InMemoryFileSystemEntry>>,
  current_working_directory: RwLock<PathBuf>,
}

impl Default for InMemoryFileSystem {
  fn default() -> Self {
    Self {
      files: Default::default(),
      current_working_directory: RwLock::new(root_dir()),
    }
  }
}

impl InMemoryFileSystem {
  /// Change the current working directory. Used for resolving relative paths.
  pub fn set_current_working_directory(&self, cwd: &Path) {
    let cwd = self.resolve(cwd);
    *self.current_working_directory.write() = cwd;
  }

  /// List every file currently stored, sorted by path
  pub fn files(&self) -> Vec<PathBuf> {
    let mut files = self
      .files
      .read()
      .iter()
      .filter(|(_, entry)| matches!(entry, InMemoryFileSystemEntry::File { .. }))
      .map(|(path, _)| path.clone())
      .collect::<Vec<_>>();

    files.sort();
    files
  }

  fn resolve(&self, path: &Path) -> PathBuf {
    normalize_path(&self.current_working_directory.read(), path)
  }
}

impl FileSystem for InMemoryFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    Ok(self.current_working_directory.read().clone())
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    let path = self.resolve(path);
    let mut files = self.files.write();

    let mut dir = Some(path.as_path());
    while let Some(path) = dir {
      if let Some(InMemoryFileSystemEntry::File { .. }) = files.get(path) {
        return Err(io::Error::new(
          io::ErrorKind::AlreadyExists,
          format!("{} is a file", path.display()),
        ));
      }

      files.insert(path.to_path_buf(), InMemoryFileSystemEntry::Directory);
      dir = path.parent();
    }

    Ok(())
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let path = self.resolve(path);
    let files = self.files.read();

    match files.get(&path) {
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
      Some(InMemoryFileSystemEntry::File { contents }) => Ok(contents.clone()),
      Some(InMemoryFileSystemEntry::Directory) => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Path is a directory",
      )),
    }
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let bytes = self.read(path)?;
    String::from_utf8(bytes).map_err(|_| io::Error::other("Unable to read file as string"))
  }

  fn is_file(&self, path: &Path) -> bool {
    let path = self.resolve(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::File { .. })
    )
  }

  fn is_dir(&self, path: &Path) -> bool {
    let path = self.resolve(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::Directory)
    )
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    let path = self.resolve(path);
    let mut files = self.files.write();

    if let Some(InMemoryFileSystemEntry::Directory) = files.get(&path) {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Path is a directory",
      ));
    }

    files.insert(
      path.clone(),
      InMemoryFileSystemEntry::File {
        contents: contents.to_vec(),
      },
    );

    let mut dir = path.parent();
    while let Some(path) = dir {
      files.insert(path.to_path_buf(), InMemoryFileSystemEntry::Directory);
      dir = path.parent();
    }

    Ok(())
  }

  fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
    let from = self.resolve(from);
    let to = self.resolve(to);
    let mut files = self.files.write();

    match files.remove(&from) {
      Some(entry @ InMemoryFileSystemEntry::File { .. }) => {
        files.insert(to, entry);
        Ok(())
      }
      Some(entry) => {
        files.insert(from, entry);
        Err(io::Error::new(
          io::ErrorKind::InvalidInput,
          "Path is a directory",
        ))
      }
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
    }
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    let path = self.resolve(path);
    let mut files = self.files.write();

    match files.get(&path) {
      Some(InMemoryFileSystemEntry::File { .. }) => {
        files.remove(&path);
        Ok(())
      }
      Some(InMemoryFileSystemEntry::Directory) => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Path is a directory",
      )),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
    }
  }
}

#[cfg(test)]
mod test {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_canonicalize_noop() {
    let fs = InMemoryFileSystem::default();
    let path = root_dir().join("foo/bar");
    let result = fs.canonicalize_base(&path).unwrap();
    assert_eq!(result, path);
  }

  #[test]
  fn test_with_cwd() {
    let fs = InMemoryFileSystem::default();
    fs.set_current_working_directory(Path::new("/other"));
    let result = fs.canonicalize_base(Path::new("./foo/./bar/../baz/")).unwrap();
    assert_eq!(result, root_dir().join("other/foo/baz"));
    assert!(result.is_absolute());
  }

  #[test]
  fn test_read_file() {
    let fs = InMemoryFileSystem::default();
    fs.write(Path::new("/foo/bar"), b"contents").unwrap();
    let result = fs.read_to_string(Path::new("/foo/bar")).unwrap();
    assert_eq!(result, "contents");
  }

  #[test]
  fn test_read_file_not_found() {
    let fs = InMemoryFileSystem::default();
    let result = fs.read_to_string(Path::new("/foo/bar"));
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
  }

  #[test]
  fn test_write_creates_parent_directories() {
    let fs = InMemoryFileSystem::default();
    fs.write(Path::new("/foo/bar/baz.js"), b"").unwrap();

    assert!(fs.is_file(Path::new("/foo/bar/baz.js")));
    assert!(fs.is_dir(Path::new("/foo/bar")));
    assert!(fs.is_dir(Path::new("/foo")));
    assert!(!fs.is_file(Path::new("/foo")));
  }

  #[test]
  fn test_rename_replaces_destination() {
    let fs = InMemoryFileSystem::default();
    fs.write(Path::new("/dist/.index.js.tmp"), b"new").unwrap();
    fs.write(Path::new("/dist/index.js"), b"old").unwrap();

    fs.rename(Path::new("/dist/.index.js.tmp"), Path::new("/dist/index.js"))
      .unwrap();

    assert_eq!(fs.files(), vec![PathBuf::from("/dist/index.js")]);
    assert_eq!(fs.read_to_string(Path::new("/dist/index.js")).unwrap(), "new");
  }

  #[test]
  fn test_rename_missing_file_fails() {
    let fs = InMemoryFileSystem::default();
    let result = fs.rename(Path::new("/a"), Path::new("/b"));
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
  }

  #[test]
  fn test_remove_file() {
    let fs = InMemoryFileSystem::default();
    fs.write(Path::new("/a.js"), b"").unwrap();
    fs.remove_file(Path::new("/a.js")).unwrap();
    assert!(!fs.is_file(Path::new("/a.js")));
  }

  #[test]
  fn test_create_dir_all_under_a_file_fails() {
    let fs = InMemoryFileSystem::default();
    fs.write(Path::new("/dist"), b"").unwrap();
    assert!(fs.create_dir_all(Path::new("/dist/nested")).is_err());
  }

  #[test]
  fn test_changing_the_cwd_will_correctly_resolve_files() {
    let fs = InMemoryFileSystem::default();
    fs.set_current_working_directory(Path::new("/foo"));

    fs.write(Path::new("bar"), b"").unwrap();
    assert!(fs.is_file(Path::new("bar")));

    fs.set_current_working_directory(Path::new("/"));
    assert!(fs.is_file(Path::new("/foo/bar")));
  }
}
