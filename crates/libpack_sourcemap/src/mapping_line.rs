use serde::{Deserialize, Serialize};

use crate::mapping::OriginalLocation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMapping {
  pub generated_column: u32,
  pub original: Option<OriginalLocation>,
}

/// Mappings of one generated line, kept sorted by generated column
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MappingLine {
  pub mappings: Vec<LineMapping>,
}

impl MappingLine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_mapping(&mut self, generated_column: u32, original: Option<OriginalLocation>) {
    let mapping = LineMapping {
      generated_column,
      original,
    };

    match self
      .mappings
      .last()
      .map(|last| last.generated_column <= generated_column)
    {
      Some(true) | None => self.mappings.push(mapping),
      Some(false) => {
        let index = self
          .mappings
          .partition_point(|m| m.generated_column <= generated_column);
        self.mappings.insert(index, mapping);
      }
    }
  }

  /// The last mapping starting at or before `generated_column`.
  ///
  /// Columns before the first mapping resolve to the first mapping of the line.
  pub fn find_closest_mapping(&self, generated_column: u32) -> Option<LineMapping> {
    let index = self
      .mappings
      .partition_point(|m| m.generated_column <= generated_column);

    if index == 0 {
      self.mappings.first().copied()
    } else {
      self.mappings.get(index - 1).copied()
    }
  }
}
