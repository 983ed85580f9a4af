pub mod cache;
pub mod error;
pub mod hash;
pub mod stage;
pub mod types;
