//! Dialect-specific script wrapping and response decoding.

mod dialect;
mod response;

pub use dialect::*;
pub use response::*;
