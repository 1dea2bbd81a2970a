//! Sentinel framing and single-script execution.
//!
//! The REPL's stdout has no message boundaries of its own. This module adds
//! them by appending a random marker to every script and reading until the
//! marker comes back.

mod executor;
mod host;
mod noise;
mod sentinel;

pub use executor::*;
pub use host::*;
pub use noise::*;
pub use sentinel::*;
