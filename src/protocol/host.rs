//! The seam between the executor and whatever runs the REPL.

use tokio::sync::{broadcast, watch};

use crate::process::{ProcessFault, ProcessState};

/// Listeners held by one in-flight execution.
///
/// Dropping the subscription unsubscribes every listener at once, so each
/// exit path of an execution releases them exactly once.
#[derive(Debug)]
pub struct Subscription {
    pub stdout: broadcast::Receiver<String>,
    pub stderr: broadcast::Receiver<String>,
    pub faults: broadcast::Receiver<ProcessFault>,
    pub state: watch::Receiver<ProcessState>,
}

/// Something that accepts script lines and broadcasts the REPL's output.
pub trait ScriptHost: Send + Sync {
    /// Start listening. Only events emitted after this call are seen.
    fn subscribe(&self) -> Subscription;

    /// Queue one line for the REPL's stdin.
    fn write_line(&self, text: &str);

    /// The fault that ended the process, if any.
    fn last_fault(&self) -> Option<ProcessFault>;

    /// Whether a transcript is being kept that errors can point to.
    fn has_output_log(&self) -> bool {
        false
    }

    /// Append a line to the transcript, if one is kept.
    fn log(&self, _text: &str) {}
}
