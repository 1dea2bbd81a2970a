//! Classification of stderr output into benign noise and real errors.
//!
//! Database shells write a fair amount of chatter to stderr: inspector
//! banners when a debugger is attached, version banners, update and telemetry
//! notices. None of that means the script failed.

/// Substrings identifying stderr lines that never indicate a script failure.
pub const BENIGN_STDERR: &[&str] = &[
    "Debugger listening on",
    "Debugger attached",
    "Waiting for the debugger to disconnect",
    "For help, see: https://nodejs.org/en/docs/inspector",
    "For help see https://nodejs.org/en/docs/inspector",
    "Current Mongosh Log ID:",
    "Using MongoDB:",
    "Using Mongosh:",
    "is available for download",
    "For mongosh info see:",
    "anonymous usage data is collected",
    "disableTelemetry()",
    "https://www.mongodb.com/legal/privacy-policy",
    "ExperimentalWarning:",
    "(Use `node --trace-warnings ...`",
];

/// Whether a single stderr line is known to be harmless.
#[must_use]
pub fn is_benign(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || BENIGN_STDERR.iter().any(|pattern| line.contains(pattern))
}

/// Classify one stderr chunk.
///
/// Returns the lines that are not on the allow-list, joined with newlines, or
/// `None` when the whole chunk is noise.
#[must_use]
pub fn classify_stderr(chunk: &str) -> Option<String> {
    let offending: Vec<&str> = chunk
        .lines()
        .filter(|line| !is_benign(line))
        .map(str::trim_end)
        .collect();

    if offending.is_empty() {
        None
    } else {
        Some(offending.join("\n"))
    }
}
