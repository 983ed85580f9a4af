mod mapping;
mod mapping_line;
mod source_map;
mod sourcemap_error;
mod utils;
mod vlq_utils;

pub use mapping::{Mapping, OriginalLocation};
pub use source_map::SourceMap;
pub use sourcemap_error::SourceMapError;
