//! Process lifecycle state and fatal fault classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a spawned REPL process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Starting,
    Running,
    /// Exited on its own, without a kill request.
    Exited,
    /// Terminated after `kill()`.
    Killed,
    /// Waiting on the process failed.
    Errored,
}

impl ProcessState {
    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Killed | Self::Errored)
    }
}

/// A fatal condition reported on a session's fault channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessFault {
    /// Writing to stdin failed because the read end is gone.
    BrokenPipe,
    /// Any other I/O failure on the process pipes or handle.
    Io(String),
    /// The process exited without being asked to.
    Exited {
        /// Exit code, if the OS reported one.
        code: Option<i32>,
    },
}

impl ProcessFault {
    #[must_use]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Self::BrokenPipe)
    }
}

impl fmt::Display for ProcessFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenPipe => f.write_str("broken pipe writing to process"),
            Self::Io(message) => f.write_str(message),
            Self::Exited { code: Some(code) } if *code != 0 => {
                write!(f, "process exited with code {code}")
            }
            Self::Exited { .. } => f.write_str("process exited prematurely"),
        }
    }
}
