//! Error types surfaced by the script-execution engine.

/// Hint appended to errors when an output log is available.
pub const OUTPUT_LOG_HINT: &str = " (see the output log for details)";

/// Coarse classification of a [`ShellError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Startup,
    Script,
    Process,
    Timeout,
}

/// Errors produced while starting a shell or running a script on it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// The process never became runnable, or the executable was not found.
    #[error("{0}")]
    Startup(String),
    /// The REPL reported a problem on stderr. The session stays usable.
    #[error("{0}")]
    Script(String),
    /// The process died or a pipe failed. The session is unusable.
    #[error("{0}")]
    Process(String),
    /// No sentinel arrived before the per-script timeout.
    #[error("{0}")]
    Timeout(String),
}

impl ShellError {
    /// The error message without any decoration.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Startup(m) | Self::Script(m) | Self::Process(m) | Self::Timeout(m) => m,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Startup(_) => ErrorKind::Startup,
            Self::Script(_) => ErrorKind::Script,
            Self::Process(_) => ErrorKind::Process,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Append [`OUTPUT_LOG_HINT`] unless the message already carries it.
    #[must_use]
    pub fn with_output_hint(self) -> Self {
        if self.message().contains(OUTPUT_LOG_HINT.trim()) {
            return self;
        }
        self.map_message(|m| format!("{m}{OUTPUT_LOG_HINT}"))
    }

    /// Re-tag any error as a startup failure, keeping its message.
    #[must_use]
    pub fn into_startup(self) -> Self {
        match self {
            Self::Script(m) | Self::Process(m) | Self::Timeout(m) => Self::Startup(m),
            startup @ Self::Startup(_) => startup,
        }
    }

    fn map_message(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Self::Startup(m) => Self::Startup(f(m)),
            Self::Script(m) => Self::Script(f(m)),
            Self::Process(m) => Self::Process(f(m)),
            Self::Timeout(m) => Self::Timeout(f(m)),
        }
    }
}
