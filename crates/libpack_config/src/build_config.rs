use std::path::PathBuf;

use libpack_core::error::ConfigError;
use libpack_core::types::{LibraryInfo, TargetDescriptor};

/// A validated build request
#[derive(Clone, Debug, PartialEq)]
pub struct BuildConfig {
  /// The directory of the config file, every path is resolved against it
  pub project_root: PathBuf,
  pub library: LibraryInfo,
  pub targets: Vec<TargetDescriptor>,
}

impl BuildConfig {
  /// Keep only the named targets, in the order they were declared
  pub fn select_targets(mut self, names: &[String]) -> Result<Self, ConfigError> {
    if names.is_empty() {
      return Ok(self);
    }

    if let Some(unknown) = names
      .iter()
      .find(|name| !self.targets.iter().any(|target| &target.name == *name))
    {
      return Err(ConfigError::UnknownTarget(unknown.clone()));
    }

    self.targets.retain(|target| names.contains(&target.name));
    Ok(self)
  }

  /// No two targets may write the same file or directory, or into each other's directory
  pub fn check_outputs(&self) -> Result<(), ConfigError> {
    let mut outputs: Vec<(PathBuf, &str)> = Vec::new();

    for target in &self.targets {
      for output in target.output_paths() {
        for (seen, first) in &outputs {
          if *seen == output {
            return Err(ConfigError::DuplicateOutput {
              first: first.to_string(),
              second: target.name.clone(),
              output,
            });
          }

          let (outer, inner, outer_target, inner_target) = if output.starts_with(seen) {
            (seen, &output, *first, target.name.as_str())
          } else if seen.starts_with(&output) {
            (&output, seen, target.name.as_str(), *first)
          } else {
            continue;
          };

          return Err(ConfigError::NestedOutput {
            outer_target: outer_target.to_string(),
            outer: outer.clone(),
            inner_target: inner_target.to_string(),
            inner: inner.clone(),
          });
        }
      }

      outputs.extend(
        target
          .output_paths()
          .into_iter()
          .map(|output| (output, target.name.as_str())),
      );
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use libpack_core::types::{OutputShape, TargetDescriptorBuilder};

  use super::*;

  fn config() -> BuildConfig {
    BuildConfig {
      project_root: PathBuf::from("/repo"),
      library: LibraryInfo::new("mylib", "1.0.0"),
      targets: vec![
        TargetDescriptorBuilder::default()
          .name("esm")
          .output("/repo/dist/esm")
          .build()
          .unwrap(),
        TargetDescriptorBuilder::default()
          .name("bundle")
          .shape(OutputShape::SingleFile)
          .output("/repo/dist/mylib.js")
          .build()
          .unwrap(),
      ],
    }
  }

  #[test]
  fn selects_targets_by_name() {
    let selected = config().select_targets(&[String::from("bundle")]).unwrap();

    assert_eq!(
      selected
        .targets
        .iter()
        .map(|target| target.name.as_str())
        .collect::<Vec<_>>(),
      vec!["bundle"]
    );
  }

  #[test]
  fn returns_error_for_unknown_targets() {
    assert_eq!(
      config().select_targets(&[String::from("umd")]),
      Err(ConfigError::UnknownTarget(String::from("umd")))
    );
  }

  #[test]
  fn returns_error_for_targets_writing_the_same_output() {
    let mut config = config();
    config.targets[1].output = PathBuf::from("/repo/dist/esm");
    config.targets[1].shape = OutputShape::PerModule;

    assert_eq!(
      config.check_outputs(),
      Err(ConfigError::DuplicateOutput {
        first: String::from("esm"),
        second: String::from("bundle"),
        output: PathBuf::from("/repo/dist/esm"),
      })
    );
  }

  #[test]
  fn returns_error_for_outputs_inside_another_target_directory() {
    let mut inner_file = config();
    inner_file.targets[1].output = PathBuf::from("/repo/dist/esm/mylib.js");

    assert_eq!(
      inner_file.check_outputs(),
      Err(ConfigError::NestedOutput {
        outer_target: String::from("esm"),
        outer: PathBuf::from("/repo/dist/esm"),
        inner_target: String::from("bundle"),
        inner: PathBuf::from("/repo/dist/esm/mylib.js"),
      })
    );

    let mut outer_dir = config();
    outer_dir.targets[0].output = PathBuf::from("/repo/dist/esm/nested");
    outer_dir.targets[1].output = PathBuf::from("/repo/dist/esm");
    outer_dir.targets[1].shape = OutputShape::PerModule;

    assert_eq!(
      outer_dir.check_outputs(),
      Err(ConfigError::NestedOutput {
        outer_target: String::from("bundle"),
        outer: PathBuf::from("/repo/dist/esm"),
        inner_target: String::from("esm"),
        inner: PathBuf::from("/repo/dist/esm/nested"),
      })
    );
  }

  #[test]
  fn accepts_sibling_outputs_sharing_a_prefix() {
    let mut config = config();
    config.targets[1].output = PathBuf::from("/repo/dist/esm.js");

    assert_eq!(config.check_outputs(), Ok(()));
  }
}
