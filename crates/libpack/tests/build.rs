use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;

use libpack::config::{BuildConfig, ConfigLoader};
use libpack_core::cache::{FsCache, InMemoryCache};
use libpack::file_system::os_file_system::OsFileSystem;
use libpack::file_system::FileSystemRef;
use libpack::stages::StageRegistry;
use libpack::{Libpack, TargetState};

const CONFIG: &str = indoc! {r#"
  {
    library: { name: "mylib", version: "1.0.0" },
    versionTag: "<LIBRARY_NAME> @{version}",
    targets: [
      { name: "esm", entry: "src/index.ts", dir: "dist/esm", format: "esmodule", sourcemap: true },
      { name: "cjs", entry: "src/index.ts", file: "dist/<LIBRARY_NAME>.cjs.js", format: "commonjs" },
      { name: "min", entry: "src/index.ts", file: "dist/<LIBRARY_NAME>.min.js", minify: true },
    ],
  }
"#};

fn project() -> TempDir {
  let dir = TempDir::new().unwrap();
  dir.child("libpack.config.json5").write_str(CONFIG).unwrap();
  dir
    .child("src/index.ts")
    .write_str("export const VERSION: string = \"1.0.0\";\nexport { twice } from './math';\n")
    .unwrap();
  dir
    .child("src/math.ts")
    .write_str("export function twice(value: number): number {\n  return value * 2;\n}\n")
    .unwrap();
  dir
}

fn load(fs: &FileSystemRef, dir: &TempDir) -> BuildConfig {
  ConfigLoader::new(fs.clone())
    .load(
      &dir.path().join("libpack.config.json5"),
      &StageRegistry::default().names(),
    )
    .unwrap()
}

fn read(dir: &TempDir, path: &str) -> String {
  std::fs::read_to_string(dir.path().join(path)).unwrap()
}

/// Every file below `root`, keyed by its path relative to `root`
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
  let mut files = BTreeMap::new();
  let mut queue = vec![root.to_path_buf()];
  while let Some(dir) = queue.pop() {
    for entry in std::fs::read_dir(&dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        queue.push(path);
      } else {
        let contents = std::fs::read(&path).unwrap();
        files.insert(path.strip_prefix(root).unwrap().to_path_buf(), contents);
      }
    }
  }
  files
}

#[test]
fn builds_every_variant_of_the_library() {
  let dir = project();
  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let config = load(&fs, &dir);

  let report = Libpack::new(fs, None).build(&config).unwrap();

  assert!(report.is_success(), "{:#?}", report.targets);

  let esm = read(&dir, "dist/esm/index.js");
  assert!(esm.starts_with("/* mylib @1.0.0 */\nexport const VERSION = '1.0.0';\n"));
  assert!(esm.contains("export { twice } from './math.js';"));
  assert!(esm.ends_with("//# sourceMappingURL=index.js.map\n"));
  assert!(dir.path().join("dist/esm/math.js").is_file());
  assert!(dir.path().join("dist/esm/index.js.map").is_file());

  let cjs = read(&dir, "dist/mylib.cjs.js");
  assert!(cjs.starts_with("/* mylib @1.0.0 */\n"));
  assert!(cjs.contains("exports.VERSION = VERSION;"));
  assert!(cjs.contains("exports.twice"));

  let min = read(&dir, "dist/mylib.min.js");
  assert!(min.starts_with("/* mylib @1.0.0 */\n"));
  assert!(min.contains("1.0.0"));
  assert!(!min.contains("\n  "));
}

#[test]
fn source_maps_point_at_the_original_lines() {
  let dir = project();
  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let config = load(&fs, &dir);

  Libpack::new(fs, None).build(&config).unwrap();

  let map: serde_json::Value = serde_json::from_str(&read(&dir, "dist/esm/index.js.map")).unwrap();
  assert_eq!(map["sources"], serde_json::json!(["../../src/index.ts"]));
  assert_eq!(
    map["sourcesContent"][0],
    "export const VERSION: string = \"1.0.0\";\nexport { twice } from './math';\n"
  );
}

#[test]
fn caching_does_not_change_the_artifacts() {
  let uncached = project();
  let cached = project();
  let fs: FileSystemRef = Arc::new(OsFileSystem);

  Libpack::new(fs.clone(), None)
    .build(&load(&fs, &uncached))
    .unwrap();

  let cache_dir = cached.path().join(".cache");
  let libpack = Libpack::new(fs.clone(), Some(Arc::new(FsCache::new(fs.clone(), cache_dir))));
  let config = load(&fs, &cached);
  libpack.build(&config).unwrap();
  let report = libpack.build(&config).unwrap();

  assert!(report.cache.hits > 0);
  for path in ["dist/esm/math.js", "dist/mylib.cjs.js", "dist/mylib.min.js"] {
    assert_eq!(read(&uncached, path), read(&cached, path));
  }
}

#[test]
fn repeated_builds_write_identical_bytes() {
  let dir = project();
  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let config = load(&fs, &dir);
  let dist = dir.path().join("dist");

  let first_report = Libpack::new(fs.clone(), None).build(&config).unwrap();
  assert!(first_report.is_success(), "{:#?}", first_report.targets);
  let first = snapshot(&dist);

  std::fs::remove_dir_all(&dist).unwrap();

  let second_report = Libpack::new(fs.clone(), None).build(&config).unwrap();
  assert!(second_report.is_success(), "{:#?}", second_report.targets);
  let second = snapshot(&dist);

  assert_eq!(
    first.keys().collect::<Vec<_>>(),
    vec![
      Path::new("esm/index.js"),
      Path::new("esm/index.js.map"),
      Path::new("esm/math.js"),
      Path::new("esm/math.js.map"),
      Path::new("mylib.cjs.js"),
      Path::new("mylib.min.js"),
    ]
  );
  assert_eq!(first, second);
}

#[test]
fn a_broken_target_does_not_stop_the_others() {
  let dir = project();
  dir.child("src/broken.ts").write_str("export const = ;\n").unwrap();
  dir
    .child("libpack.config.json5")
    .write_str(indoc! {r#"
      {
        library: { name: "mylib", version: "1.0.0" },
        targets: [
          { name: "broken", entry: "src/broken.ts", dir: "dist/broken" },
          { name: "esm", entry: "src/index.ts", dir: "dist/esm" },
        ],
      }
    "#})
    .unwrap();

  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let config = load(&fs, &dir);
  let report = Libpack::new(fs, Some(Arc::new(InMemoryCache::default())))
    .build(&config)
    .unwrap();

  assert_eq!(report.targets[0].state, TargetState::Failed);
  assert_eq!(report.targets[1].state, TargetState::Done);
  assert!(!Path::new(&dir.path().join("dist/broken")).exists());
  assert!(dir.path().join("dist/esm/index.js").is_file());
}
