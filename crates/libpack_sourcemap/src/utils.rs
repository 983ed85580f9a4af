use std::path::Path;

/// Express `source` relative to `root`, using forward slashes
pub fn make_relative_path(root: &str, source: &str) -> String {
  let source_path = Path::new(source);
  if root.is_empty() || !source_path.is_absolute() {
    return source.replace('\\', "/");
  }

  match pathdiff::diff_paths(source_path, root) {
    Some(relative) => relative.to_string_lossy().replace('\\', "/"),
    None => source.replace('\\', "/"),
  }
}
