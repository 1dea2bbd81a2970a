//! Running one script to completion against a [`ScriptHost`].
//!
//! An execution subscribes to the host, writes the script followed by its
//! sentinel, and then races four sources against each other: the sentinel
//! showing up on stdout, a non-benign stderr line, a process fault, and the
//! timeout. The first one to fire settles the execution and the
//! [`Subscription`] is dropped with it.

use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Sleep;

use crate::process::{ProcessFault, ProcessState};
use crate::protocol::{
    classify_stderr, frame_script, scrub_sentinels, ScriptHost, Sentinel, SentinelScanner,
    Subscription,
};
use crate::shell::ShellError;

/// How long to wait after a broken pipe for the process to explain itself.
pub const BROKEN_PIPE_GRACE: Duration = Duration::from_millis(500);

/// Paging hint printed by the shell when a result has more batches.
pub const MORE_PROMPT: &str = "Type \"it\" for more";

/// Replacement for [`MORE_PROMPT`]; follow-up paging is not supported.
pub const MORE_REPLACEMENT: &str = "(more)";

/// Default advice appended to timeout errors.
pub const DEFAULT_TIMEOUT_HINT: &str =
    "To allow more time, raise `timeout_secs` in the [shell] section of the configuration file.";

/// Runs single script executions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    broken_pipe_grace: Duration,
    timeout_hint: String,
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            broken_pipe_grace: BROKEN_PIPE_GRACE,
            timeout_hint: DEFAULT_TIMEOUT_HINT.to_string(),
        }
    }

    #[must_use]
    pub fn with_broken_pipe_grace(mut self, grace: Duration) -> Self {
        self.broken_pipe_grace = grace;
        self
    }

    /// Replace the advice appended to timeout errors.
    #[must_use]
    pub fn with_timeout_hint(mut self, hint: impl Into<String>) -> Self {
        self.timeout_hint = hint.into();
        self
    }

    /// Execute `script` and return everything the REPL printed before
    /// `sentinel`.
    ///
    /// A `timeout_secs` of 0 disables the timeout.
    ///
    /// # Errors
    ///
    /// - `ShellError::Script` when stderr carries a line that is not known noise.
    /// - `ShellError::Process` when the process faults, exits, or is killed.
    /// - `ShellError::Timeout` when the sentinel does not arrive in time.
    pub async fn execute<H>(
        &self,
        host: &H,
        script: &str,
        sentinel: &Sentinel,
        timeout_secs: u64,
    ) -> Result<String, ShellError>
    where
        H: ScriptHost + ?Sized,
    {
        let started = Instant::now();
        tracing::debug!(%sentinel, timeout_secs, "Executing script");

        let result = self.race(host, script, sentinel, timeout_secs).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(output) => {
                tracing::debug!(%sentinel, elapsed_ms, bytes = output.len(), "Script completed");
                Ok(output)
            }
            Err(err) => {
                tracing::warn!(%sentinel, elapsed_ms, kind = ?err.kind(), error = %err, "Script failed");
                host.log(err.message());
                if host.has_output_log() {
                    Err(err.with_output_hint())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn race<H>(
        &self,
        host: &H,
        script: &str,
        sentinel: &Sentinel,
        timeout_secs: u64,
    ) -> Result<String, ShellError>
    where
        H: ScriptHost + ?Sized,
    {
        let Subscription {
            mut stdout,
            mut stderr,
            mut faults,
            mut state,
        } = host.subscribe();

        let current = *state.borrow_and_update();
        if current.is_terminal() {
            return Err(terminal_error(current, host.last_fault()));
        }

        let mut timeout: Option<Pin<Box<Sleep>>> = (timeout_secs > 0)
            .then(|| Box::pin(tokio::time::sleep(Duration::from_secs(timeout_secs))));
        let mut grace: Option<Pin<Box<Sleep>>> = None;
        let (mut stdout_open, mut stderr_open, mut faults_open, mut state_open) =
            (true, true, true, true);
        let mut scanner = SentinelScanner::new(sentinel);

        for line in frame_script(script, sentinel) {
            host.write_line(&line);
        }

        loop {
            tokio::select! {
                biased;

                chunk = stdout.recv(), if stdout_open => match chunk {
                    Ok(chunk) => {
                        if let Some(result) = scanner.push(&chunk) {
                            // Markers echoed late by an earlier, failed run.
                            let output = scrub_sentinels(result);
                            return Ok(output.replace(MORE_PROMPT, MORE_REPLACEMENT));
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Stdout listener lagged");
                        return Err(ShellError::Process(format!(
                            "output was dropped: listener lagged by {missed} chunks"
                        )));
                    }
                    Err(RecvError::Closed) => stdout_open = false,
                },
                chunk = stderr.recv(), if stderr_open => match chunk {
                    Ok(chunk) => {
                        if let Some(message) = classify_stderr(&chunk) {
                            return Err(ShellError::Script(message));
                        }
                        tracing::trace!(bytes = chunk.len(), "Ignoring benign stderr");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Stderr listener lagged; output was dropped");
                    }
                    Err(RecvError::Closed) => stderr_open = false,
                },
                fault = faults.recv(), if faults_open => match fault {
                    Ok(ProcessFault::BrokenPipe) => {
                        if grace.is_none() {
                            tracing::debug!("Broken pipe; waiting for the process to report");
                            grace = Some(Box::pin(tokio::time::sleep(self.broken_pipe_grace)));
                        }
                    }
                    Ok(fault) => return Err(ShellError::Process(fault.to_string())),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => faults_open = false,
                },
                changed = state.changed(), if state_open => match changed {
                    Ok(()) => {
                        let current = *state.borrow_and_update();
                        if current.is_terminal() {
                            return Err(terminal_error(current, host.last_fault()));
                        }
                    }
                    Err(_) => state_open = false,
                },
                () = elapsed(&mut grace) => {
                    return Err(ShellError::Process("process exited prematurely".to_string()));
                }
                () = elapsed(&mut timeout) => {
                    return Err(ShellError::Timeout(format!(
                        "Timed out executing script after {timeout_secs} seconds. {}",
                        self.timeout_hint
                    )));
                }
            }
        }
    }
}

/// Resolves when the timer fires; never resolves when there is no timer.
async fn elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

fn terminal_error(state: ProcessState, fault: Option<ProcessFault>) -> ShellError {
    let message = match (state, fault) {
        (ProcessState::Killed, _) => "process was killed".to_string(),
        (_, Some(fault)) if !fault.is_broken_pipe() => fault.to_string(),
        _ => "process exited prematurely".to_string(),
    };
    ShellError::Process(message)
}
