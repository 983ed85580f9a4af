use std::borrow::Cow;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mapping::{Mapping, OriginalLocation};
use crate::mapping_line::MappingLine;
use crate::sourcemap_error::SourceMapError;
use crate::utils::make_relative_path;
use crate::vlq_utils::{is_mapping_separator, read_relative_vlq};

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct SourceMapInner {
  sources: Vec<String>,
  sources_content: Vec<String>,
  names: Vec<String>,
  mapping_lines: Vec<MappingLine>,
}

/// Line oriented source map.
///
/// Sources are stored relative to `project_root`. Generated and original positions are zero
/// based, the JSON form follows the version 3 format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceMap {
  pub project_root: String,
  inner: SourceMapInner,
}

impl SourceMap {
  pub fn new(project_root: &Path) -> Self {
    Self {
      project_root: project_root.to_string_lossy().to_string(),
      inner: SourceMapInner::default(),
    }
  }

  /// Map every line of `source_content` onto itself
  pub fn identity(
    project_root: &Path,
    source: &str,
    source_content: &str,
  ) -> Result<Self, SourceMapError> {
    let mut map = Self::new(project_root);
    map.add_empty_map(source, source_content, 0)?;
    Ok(map)
  }

  fn ensure_lines(&mut self, generated_line: usize) {
    if self.inner.mapping_lines.len() <= generated_line {
      self
        .inner
        .mapping_lines
        .resize_with(generated_line + 1, MappingLine::new);
    }
  }

  pub fn add_mapping(
    &mut self,
    generated_line: u32,
    generated_column: u32,
    original: Option<OriginalLocation>,
  ) {
    self.ensure_lines(generated_line as usize);
    self.inner.mapping_lines[generated_line as usize].add_mapping(generated_column, original);
  }

  pub fn find_closest_mapping(&self, generated_line: u32, generated_column: u32) -> Option<Mapping> {
    let line = self.inner.mapping_lines.get(generated_line as usize)?;
    let line_mapping = line.find_closest_mapping(generated_column)?;

    Some(Mapping {
      generated_line,
      generated_column: line_mapping.generated_column,
      original: line_mapping.original,
    })
  }

  /// Resolve a generated position to its source path and original location
  pub fn original_position_for(
    &self,
    generated_line: u32,
    generated_column: u32,
  ) -> Option<(&str, OriginalLocation)> {
    let original = self
      .find_closest_mapping(generated_line, generated_column)?
      .original?;

    let source = self.inner.sources.get(original.source as usize)?;
    Some((source.as_str(), original))
  }

  pub fn get_mappings(&self) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    for (generated_line, mapping_line) in self.inner.mapping_lines.iter().enumerate() {
      for mapping in mapping_line.mappings.iter() {
        mappings.push(Mapping {
          generated_line: generated_line as u32,
          generated_column: mapping.generated_column,
          original: mapping.original,
        });
      }
    }
    mappings
  }

  pub fn is_empty(&self) -> bool {
    self
      .inner
      .mapping_lines
      .iter()
      .all(|line| line.mappings.is_empty())
  }

  pub fn write_vlq<W>(&self, output: &mut W) -> Result<(), SourceMapError>
  where
    W: io::Write,
  {
    let mut last_generated_line: u32 = 0;
    let mut previous_source: i64 = 0;
    let mut previous_original_line: i64 = 0;
    let mut previous_original_column: i64 = 0;
    let mut previous_name: i64 = 0;

    for (generated_line, line_content) in self.inner.mapping_lines.iter().enumerate() {
      let generated_line = generated_line as u32;
      let mut previous_generated_column: u32 = 0;

      if generated_line > 0 {
        output.write_all(&b";".repeat((generated_line - last_generated_line) as usize))?;
      }

      for (index, mapping) in line_content.mappings.iter().enumerate() {
        if index > 0 {
          output.write_all(b",")?;
        }

        vlq::encode(
          mapping.generated_column as i64 - previous_generated_column as i64,
          output,
        )?;
        previous_generated_column = mapping.generated_column;

        if let Some(original) = &mapping.original {
          vlq::encode(original.source as i64 - previous_source, output)?;
          previous_source = original.source as i64;

          vlq::encode(original.original_line as i64 - previous_original_line, output)?;
          previous_original_line = original.original_line as i64;

          vlq::encode(
            original.original_column as i64 - previous_original_column,
            output,
          )?;
          previous_original_column = original.original_column as i64;

          if let Some(name) = original.name {
            vlq::encode(name as i64 - previous_name, output)?;
            previous_name = name as i64;
          }
        }
      }

      last_generated_line = generated_line;
    }

    Ok(())
  }

  pub fn add_source(&mut self, source: &str) -> u32 {
    let relative_source = make_relative_path(self.project_root.as_str(), source);
    match self
      .inner
      .sources
      .iter()
      .position(|s| relative_source.eq(s))
    {
      Some(i) => i as u32,
      None => {
        self.inner.sources.push(relative_source);
        (self.inner.sources.len() - 1) as u32
      }
    }
  }

  pub fn get_sources(&self) -> &Vec<String> {
    &self.inner.sources
  }

  pub fn add_name(&mut self, name: &str) -> u32 {
    match self.inner.names.iter().position(|s| name.eq(s)) {
      Some(i) => i as u32,
      None => {
        self.inner.names.push(String::from(name));
        (self.inner.names.len() - 1) as u32
      }
    }
  }

  pub fn get_names(&self) -> &Vec<String> {
    &self.inner.names
  }

  pub fn set_source_content(
    &mut self,
    source_index: usize,
    source_content: &str,
  ) -> Result<(), SourceMapError> {
    if source_index >= self.inner.sources.len() {
      return Err(SourceMapError::SourceOutOfRange);
    }

    if self.inner.sources_content.len() <= source_index {
      self
        .inner
        .sources_content
        .resize_with(source_index + 1, String::new);
    }

    self.inner.sources_content[source_index] = String::from(source_content);
    Ok(())
  }

  pub fn get_sources_content(&self) -> &Vec<String> {
    &self.inner.sources_content
  }

  /// Copy the sources, names and contents of `other` into this map, returning the index remapping
  fn merge_tables(&mut self, other: &SourceMap) -> Result<(Vec<u32>, Vec<u32>), SourceMapError> {
    let mut source_indexes = Vec::with_capacity(other.inner.sources.len());
    for s in other.inner.sources.iter() {
      source_indexes.push(self.add_source(&other.absolute_source(s)));
    }

    let names_indexes = other
      .inner
      .names
      .iter()
      .map(|n| self.add_name(n))
      .collect::<Vec<_>>();

    for (i, source_content) in other.inner.sources_content.iter().enumerate() {
      if let Some(source_index) = source_indexes.get(i) {
        self.set_source_content(*source_index as usize, source_content)?;
      }
    }

    Ok((source_indexes, names_indexes))
  }

  fn absolute_source(&self, source: &str) -> String {
    if self.project_root.is_empty() || Path::new(source).is_absolute() {
      return source.to_string();
    }

    Path::new(&self.project_root)
      .join(source)
      .to_string_lossy()
      .to_string()
  }

  fn remap_location(
    location: OriginalLocation,
    source_indexes: &[u32],
    names_indexes: &[u32],
  ) -> Result<OriginalLocation, SourceMapError> {
    let source = *source_indexes
      .get(location.source as usize)
      .ok_or(SourceMapError::SourceOutOfRange)?;

    let name = match location.name {
      Some(name) => Some(
        *names_indexes
          .get(name as usize)
          .ok_or(SourceMapError::NameOutOfRange)?,
      ),
      None => None,
    };

    Ok(OriginalLocation::new(
      location.original_line,
      location.original_column,
      source,
      name,
    ))
  }

  /// Append the mappings of `sourcemap`, with its generated lines moved down by `line_offset`
  pub fn add_sourcemap(
    &mut self,
    sourcemap: &SourceMap,
    line_offset: i64,
  ) -> Result<(), SourceMapError> {
    let (source_indexes, names_indexes) = self.merge_tables(sourcemap)?;

    for (line, mapping_line) in sourcemap.inner.mapping_lines.iter().enumerate() {
      let generated_line = (line as i64) + line_offset;
      if generated_line < 0 {
        continue;
      }

      for mapping in mapping_line.mappings.iter() {
        let original = match mapping.original {
          Some(location) => Some(Self::remap_location(
            location,
            &source_indexes,
            &names_indexes,
          )?),
          None => None,
        };

        self.add_mapping(generated_line as u32, mapping.generated_column, original);
      }
    }

    Ok(())
  }

  /// Compose this map (generated -> intermediate) with `original_sourcemap`
  /// (intermediate -> original) so that it maps generated positions to the original sources.
  ///
  /// Mappings that point at positions `original_sourcemap` knows nothing about are dropped
  /// back to unmapped segments.
  pub fn extends(&mut self, original_sourcemap: &SourceMap) -> Result<(), SourceMapError> {
    let own_tables = std::mem::take(&mut self.inner);
    self.inner.mapping_lines = own_tables.mapping_lines;

    let (source_indexes, names_indexes) = self.merge_tables(original_sourcemap)?;
    let own_name_indexes = own_tables
      .names
      .iter()
      .map(|name| self.add_name(name))
      .collect::<Vec<_>>();

    for line_content in self.inner.mapping_lines.iter_mut() {
      for mapping in line_content.mappings.iter_mut() {
        let Some(location) = mapping.original else {
          continue;
        };

        mapping.original = match original_sourcemap
          .find_closest_mapping(location.original_line, location.original_column)
          .and_then(|m| m.original)
        {
          Some(original) => {
            let mut remapped = Self::remap_location(original, &source_indexes, &names_indexes)?;
            // Keep our own name when the original position had none
            if remapped.name.is_none() {
              remapped.name = location
                .name
                .and_then(|n| own_name_indexes.get(n as usize).copied());
            }

            Some(remapped)
          }
          None => None,
        };
      }
    }

    Ok(())
  }

  pub fn add_vlq_map<I: AsRef<str>>(
    &mut self,
    input: &[u8],
    sources: Vec<I>,
    sources_content: Vec<I>,
    names: Vec<I>,
    line_offset: i64,
    column_offset: i64,
  ) -> Result<(), SourceMapError> {
    let mut generated_line: i64 = line_offset;
    let mut generated_column: i64 = column_offset;
    let mut original_line = 0;
    let mut original_column = 0;
    let mut source = 0;
    let mut name = 0;

    let source_indexes = sources
      .iter()
      .map(|s| self.add_source(s.as_ref()))
      .collect::<Vec<_>>();

    let name_indexes = names
      .iter()
      .map(|n| self.add_name(n.as_ref()))
      .collect::<Vec<_>>();

    for (i, source_content) in sources_content.iter().enumerate() {
      if let Some(source_index) = source_indexes.get(i) {
        self.set_source_content(*source_index as usize, source_content.as_ref())?;
      }
    }

    let mut input = input.iter().cloned().peekable();
    while let Some(byte) = input.peek().cloned() {
      match byte {
        b';' => {
          generated_line += 1;
          generated_column = column_offset;
          input.next();
        }
        b',' => {
          input.next();
        }
        _ => {
          // First is a generated column that is always present.
          read_relative_vlq(&mut generated_column, &mut input)?;

          let original = if input.peek().cloned().is_none_or(is_mapping_separator) {
            None
          } else {
            read_relative_vlq(&mut source, &mut input)?;
            read_relative_vlq(&mut original_line, &mut input)?;
            read_relative_vlq(&mut original_column, &mut input)?;

            let source = *source_indexes
              .get(source as usize)
              .ok_or(SourceMapError::SourceOutOfRange)?;

            let name = if input.peek().cloned().is_none_or(is_mapping_separator) {
              None
            } else {
              read_relative_vlq(&mut name, &mut input)?;
              Some(
                *name_indexes
                  .get(name as usize)
                  .ok_or(SourceMapError::NameOutOfRange)?,
              )
            };

            Some(OriginalLocation::new(
              original_line as u32,
              original_column as u32,
              source,
              name,
            ))
          };

          if generated_line >= 0 {
            self.add_mapping(generated_line as u32, generated_column as u32, original);
          }
        }
      }
    }

    Ok(())
  }

  /// Insert (positive offset) or remove (negative offset) generated lines before `generated_line`
  pub fn offset_lines(
    &mut self,
    generated_line: u32,
    generated_line_offset: i64,
  ) -> Result<(), SourceMapError> {
    if generated_line_offset == 0 || self.inner.mapping_lines.is_empty() {
      return Ok(());
    }

    let line = generated_line as usize;
    let abs_offset = generated_line_offset.unsigned_abs() as usize;

    if generated_line_offset > 0 {
      if line > self.inner.mapping_lines.len() {
        return Ok(());
      }

      self
        .inner
        .mapping_lines
        .splice(line..line, (0..abs_offset).map(|_| MappingLine::new()));
    } else {
      if abs_offset > line {
        return Err(SourceMapError::UnexpectedNegativeNumber(
          "line + line_offset",
        ));
      }

      let end = line.min(self.inner.mapping_lines.len());
      let start = (line - abs_offset).min(end);
      self.inner.mapping_lines.drain(start..end);
    }

    Ok(())
  }

  /// Map every line of `source_content` to column 0 of the same line in `source`
  pub fn add_empty_map(
    &mut self,
    source: &str,
    source_content: &str,
    line_offset: i64,
  ) -> Result<(), SourceMapError> {
    let source_index = self.add_source(source);
    self.set_source_content(source_index as usize, source_content)?;

    for (line_count, _line) in source_content.lines().enumerate() {
      let generated_line = (line_count as i64) + line_offset;
      if generated_line >= 0 {
        self.add_mapping(
          generated_line as u32,
          0,
          Some(OriginalLocation::new(
            line_count as u32,
            0,
            source_index,
            None,
          )),
        )
      }
    }

    Ok(())
  }

  /// Rewrite source paths so they are relative to `dir`, typically the directory of the map file
  pub fn relativize_sources(&mut self, dir: &Path) {
    let sources = std::mem::take(&mut self.inner.sources);
    self.inner.sources = sources
      .iter()
      .map(|source| {
        let absolute = self.absolute_source(source);
        make_relative_path(&dir.to_string_lossy(), &absolute)
      })
      .collect();
  }

  pub fn from_json(project_root: &Path, input: &str) -> Result<Self, SourceMapError> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct JSONSourceMap<'a> {
      mappings: &'a str,
      #[serde(borrow)]
      sources: Vec<Cow<'a, str>>,
      #[serde(borrow, default)]
      sources_content: Vec<Option<Cow<'a, str>>>,
      #[serde(borrow, default)]
      names: Vec<Cow<'a, str>>,
    }

    let json: JSONSourceMap<'_> = serde_json::from_str(input)?;
    let sources_content = (0..json.sources.len())
      .map(|i| match json.sources_content.get(i) {
        Some(Some(content)) => content.clone(),
        _ => Cow::Borrowed(""),
      })
      .collect::<Vec<_>>();

    let mut sm = Self::new(project_root);
    sm.add_vlq_map(
      json.mappings.as_bytes(),
      json.sources,
      sources_content,
      json.names,
      0,
      0,
    )?;
    Ok(sm)
  }

  pub fn to_json(&self, file: Option<&str>) -> Result<String, SourceMapError> {
    let mut vlq_output: Vec<u8> = Vec::new();
    self.write_vlq(&mut vlq_output)?;

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct JSONSourceMap<'a> {
      version: u8,
      #[serde(skip_serializing_if = "Option::is_none")]
      file: Option<&'a str>,
      mappings: &'a str,
      sources: &'a Vec<String>,
      sources_content: &'a Vec<String>,
      names: &'a Vec<String>,
    }

    let mappings = String::from_utf8_lossy(&vlq_output);
    let sm = JSONSourceMap {
      version: 3,
      file,
      mappings: &mappings,
      sources: self.get_sources(),
      sources_content: self.get_sources_content(),
      names: self.get_names(),
    };

    Ok(serde_json::to_string(&sm)?)
  }
}

impl PartialEq for SourceMap {
  fn eq(&self, other: &Self) -> bool {
    self.get_sources() == other.get_sources()
      && self.get_names() == other.get_names()
      && self.get_mappings() == other.get_mappings()
  }
}
