use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use libpack_filesystem::FileSystemRef;

pub type CacheRef = Arc<dyn Cache + Sync + Send>;

/// Content addressed blob store shared by every target of a run.
///
/// Writers must publish complete values only: a concurrent reader sees either nothing or the
/// whole blob.
#[mockall::automock]
pub trait Cache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()>;
}

/// Process local cache
#[derive(Debug, Default)]
pub struct InMemoryCache {
  entries: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl InMemoryCache {
  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }
}

impl Cache for InMemoryCache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
    Ok(self.entries.read().get(key).map(|blob| blob.to_vec()))
  }

  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
    self
      .entries
      .write()
      .insert(key.to_string(), Arc::new(blob.to_vec()));
    Ok(())
  }
}

/// Convert a cache key to a safe filesystem path.
/// Sanitizes `..` in path segments to avoid directory traversal.
pub fn get_file_key(cache_dir: &Path, key: &str) -> PathBuf {
  let clean_key = key
    .split('/')
    .map(|part| {
      if part == ".." {
        "$$__parent_dir$$"
      } else {
        part
      }
    })
    .collect::<Vec<_>>()
    .join("/");
  cache_dir.join(clean_key)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Persistent cache storing every blob as `{cache_dir}/{key}`.
///
/// Blobs are written to a temporary sibling first and renamed into place.
#[derive(Debug)]
pub struct FsCache {
  fs: FileSystemRef,
  cache_dir: PathBuf,
}

impl FsCache {
  pub fn new(fs: FileSystemRef, cache_dir: PathBuf) -> Self {
    Self { fs, cache_dir }
  }
}

impl Cache for FsCache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
    let file_path = get_file_key(&self.cache_dir, key);
    if !self.fs.is_file(&file_path) {
      return Ok(None);
    }

    Ok(Some(self.fs.read(&file_path)?))
  }

  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
    let file_path = get_file_key(&self.cache_dir, key);
    if let Some(parent) = file_path.parent() {
      self.fs.create_dir_all(parent)?;
    }

    let temp_path = file_path.with_extension(format!(
      "{}-{}.tmp",
      std::process::id(),
      TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    self.fs.write(&temp_path, blob)?;
    if let Err(error) = self.fs.rename(&temp_path, &file_path) {
      let _ = self.fs.remove_file(&temp_path);
      return Err(error.into());
    }

    Ok(())
  }
}
