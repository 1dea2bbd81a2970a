//! Configuration types.

use serde::{Deserialize, Serialize};

use crate::codec::{DialectKind, DEFAULT_LAZY_CAP};

/// Settings for launching and talking to the database shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Executable path or command name. Resolved from the search path when unset.
    pub path: Option<String>,
    /// Extra arguments passed before the connection target.
    pub args: Vec<String>,
    pub dialect: DialectKind,
    /// Per-script timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
    /// How long the process may take to start.
    pub startup_timeout_secs: u64,
    /// Result batch size configured in the shell.
    pub batch_size: u32,
    /// Most items materialized from one lazy sequence.
    pub lazy_cap: u32,
    /// Accept self-signed certificates (local emulators).
    pub tls_allow_invalid_certificates: bool,
    /// Prefix transcript lines with the time since the shell started.
    pub show_elapsed_time: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            dialect: DialectKind::default(),
            timeout_secs: 30,
            startup_timeout_secs: 60,
            batch_size: 50,
            lazy_cap: DEFAULT_LAZY_CAP,
            tls_allow_invalid_certificates: false,
            show_elapsed_time: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub shell: ShellConfig,
}
