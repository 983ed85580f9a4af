use serde::{Deserialize, Serialize};

/// Placeholder replaced by the library name in paths and templates
pub const LIBRARY_NAME_PLACEHOLDER: &str = "<LIBRARY_NAME>";

/// The library being packaged
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LibraryInfo {
  pub name: String,
  pub version: String,
}

impl LibraryInfo {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }

  /// Substitute the library placeholders in a path or template
  pub fn substitute(&self, template: &str) -> String {
    template
      .replace(LIBRARY_NAME_PLACEHOLDER, &self.name)
      .replace("{name}", &self.name)
      .replace("{version}", &self.version)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn substitutes_name_and_version() {
    let library = LibraryInfo::new("mylib", "1.0.0");

    assert_eq!(library.substitute("<LIBRARY_NAME> @{version}"), "mylib @1.0.0");
    assert_eq!(library.substitute("{name} v{version}"), "mylib v1.0.0");
    assert_eq!(library.substitute("dist/<LIBRARY_NAME>.min.js"), "dist/mylib.min.js");
  }
}
