//! dbshell-driver - drive an interactive database shell as a script engine.
//!
//! Scripts are written to a long-lived shell process, each followed by a
//! unique completion sentinel. The output up to the sentinel is the result.

pub mod codec;
pub mod config;
pub mod output;
pub mod process;
pub mod protocol;
pub mod shell;
