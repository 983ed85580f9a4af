pub use build_config::*;
pub use config_file::*;
pub use config_loader::*;

mod build_config;
mod config_file;
mod config_loader;
