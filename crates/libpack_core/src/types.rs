mod library;
mod target;

pub use self::library::*;
pub use self::target::*;
