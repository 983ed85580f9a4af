//! The source-to-source stages a libpack target pipeline is made of.
//!
//! Every stage parses its input with swc, transforms the module and prints it back together
//! with a source map of the printed code onto its input.

pub mod commonjs;
pub mod downlevel;
pub mod format;
pub mod glue;
pub mod idents;
pub mod minify;
pub mod optimize;
pub mod registry;
pub mod replace;
pub mod resolve;
pub mod runner;
pub mod typescript;
pub mod version_tag;

#[cfg(test)]
mod test_utils;

pub use registry::{StageRc, StageRegistry};
