//! NetSession Core - Fundamental types and errors

mod error;
mod types;
mod idgen;

pub use error::*;
pub use types::*;
pub use idgen::*;
