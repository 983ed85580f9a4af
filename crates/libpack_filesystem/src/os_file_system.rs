use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::FileSystem;

#[derive(Default, Debug)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    std::env::current_dir()
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    std::fs::read_to_string(path)
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn is_dir(&self, path: &Path) -> bool {
    path.is_dir()
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    std::fs::write(path, contents)
  }

  fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
    std::fs::rename(from, to)
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
  }
}

#[cfg(test)]
mod tests {
  use assert_fs::prelude::*;
  use assert_fs::TempDir;
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn writes_and_renames_files() {
    let dir = TempDir::new().unwrap();
    let fs = OsFileSystem;

    let temp = dir.path().join(".index.js.tmp");
    let target = dir.path().join("index.js");

    fs.write(&temp, b"export {};").unwrap();
    fs.rename(&temp, &target).unwrap();

    assert!(!fs.is_file(&temp));
    assert_eq!(fs.read_to_string(&target).unwrap(), "export {};");
    dir.child("index.js").assert("export {};");
  }

  #[test]
  fn create_dir_all_creates_nested_directories() {
    let dir = TempDir::new().unwrap();
    let fs = OsFileSystem;
    let nested = dir.path().join("dist").join("utils");

    fs.create_dir_all(&nested).unwrap();

    assert!(fs.is_dir(&nested));
  }
}
