//! Connecting to a database shell: executable lookup, argument building,
//! error kinds and the session facade.

mod args;
mod error;
mod resolver;
mod session;

pub use args::*;
pub use error::*;
pub use resolver::*;
pub use session::*;
