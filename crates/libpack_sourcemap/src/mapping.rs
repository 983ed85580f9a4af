use serde::{Deserialize, Serialize};

/// A zero based position in one of the map's sources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalLocation {
  pub original_line: u32,
  pub original_column: u32,
  pub source: u32,
  pub name: Option<u32>,
}

impl OriginalLocation {
  pub fn new(original_line: u32, original_column: u32, source: u32, name: Option<u32>) -> Self {
    Self {
      original_line,
      original_column,
      source,
      name,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
  pub generated_line: u32,
  pub generated_column: u32,
  pub original: Option<OriginalLocation>,
}
