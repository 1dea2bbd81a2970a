//! Output sinks for the human-visible shell transcript.
//!
//! A sink receives everything the shell prints (minus internal sentinels) plus
//! a few progress lines from the driver. Sinks are optional; without one the
//! driver still works, it just keeps no transcript.

use std::sync::{Arc, Mutex};

use owo_colors::OwoColorize;

/// Append-only text sink.
pub trait OutputSink: Send + Sync {
    /// Append one line of text.
    fn append_line(&self, line: &str);
}

/// Sink that forwards transcript lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn append_line(&self, line: &str) {
        tracing::info!(target: "dbshell_driver::transcript", "{line}");
    }
}

/// Sink that prints transcript lines to stderr, dimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl OutputSink for StderrSink {
    fn append_line(&self, line: &str) {
        eprintln!("{}", line.dimmed());
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines appended so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// All lines joined with newlines.
    #[must_use]
    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }
}

impl OutputSink for MemorySink {
    fn append_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
