//! Packages a library source tree into its distributable variants.
//!
//! A [`BuildConfig`](libpack_config::BuildConfig) declares the targets. [`Libpack`] runs each of
//! them through its [`Pipeline`]: the module graph is resolved from the entry, bundled for
//! single-file targets, threaded through the declared stages and written by the [`Emitter`].

pub use cache_stats::*;
pub use emitter::Emitter;
pub use libpack::*;
pub use pipeline::*;
pub use stage_cache::StageCache;

pub use libpack_config as config;
pub use libpack_filesystem as file_system;
pub use libpack_stages as stages;

pub mod bundle;
pub mod cache_stats;
pub mod emitter;
pub mod graph;
pub mod libpack;
pub mod pipeline;
pub mod stage_cache;
