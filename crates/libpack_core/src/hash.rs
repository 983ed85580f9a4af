use std::hash::Hasher;

use xxhash_rust::xxh3::Xxh3;

/// libpack needs to use a hasher for generating the keys of its stage cache.
///
/// The hashes don't need to be incredibly fast, but they should be stable across
/// runs, machines, platforms and versions, because they end up on disk.
pub type IdentifierHasher = Xxh3;

/// Hash a sequence of string parts, length-prefixing each so that ("ab", "c") and ("a", "bc") differ
pub fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> u64 {
  let mut hasher = IdentifierHasher::new();
  for part in parts {
    hasher.write_u64(part.len() as u64);
    hasher.write(part.as_bytes());
  }
  hasher.finish()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn hash_parts_separates_boundaries() {
    assert_ne!(hash_parts(["ab", "c"]), hash_parts(["a", "bc"]));
    assert_eq!(hash_parts(["a", "b"]), hash_parts(["a", "b"]));
  }
}
