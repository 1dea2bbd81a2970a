//! Child process ownership and typed I/O events.

mod decode;
mod session;
mod state;

pub use decode::*;
pub use session::*;
pub use state::*;
