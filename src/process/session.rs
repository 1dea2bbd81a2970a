//! Spawning and owning one interactive REPL process.
//!
//! A [`ProcessSession`] turns the raw pipes of a child process into three
//! broadcast channels (stdout text, stderr text, fatal faults) and a
//! fire-and-forget line writer. The child itself is owned by a monitor task
//! that classifies how the process ended.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::output::OutputSink;
use crate::process::{LineBuffer, ProcessFault, ProcessState, Utf8ChunkDecoder};
use crate::protocol::{scrub_sentinels, ScriptHost, Subscription};
use crate::shell::{redact_args, ShellError};

/// Default window for the OS to hand out a process id.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between SIGTERM and a hard kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Capacity of each broadcast channel.
const CHANNEL_CAPACITY: usize = 4096;

/// Size of a single pipe read.
const READ_CHUNK: usize = 8192;

const PID_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the readers to drain after the process exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Options for spawning a [`ProcessSession`].
#[derive(Clone)]
pub struct ProcessOptions {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    startup_timeout: Duration,
    kill_grace: Duration,
    sink: Option<Arc<dyn OutputSink>>,
    show_elapsed_time: bool,
}

impl ProcessOptions {
    /// Options for running `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            sink: None,
            show_elapsed_time: false,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory. An empty path means "inherit".
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.working_dir = (!dir.as_os_str().is_empty()).then_some(dir);
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Mirror the process transcript into `sink`.
    #[must_use]
    pub fn output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Prefix transcript lines with the time elapsed since spawn.
    #[must_use]
    pub fn show_elapsed_time(mut self, show: bool) -> Self {
        self.show_elapsed_time = show;
        self
    }
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("command", &self.command)
            .field("args", &self.args.len())
            .field("working_dir", &self.working_dir)
            .field("startup_timeout", &self.startup_timeout)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Human-readable command line with credentials masked.
#[must_use]
pub fn display_command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command.to_string())
        .chain(redact_args(args))
        .map(|part| shell_escape::escape(part.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Transcript writer shared by every task of a session.
struct Transcript {
    sink: Option<Arc<dyn OutputSink>>,
    started: Instant,
    show_elapsed_time: bool,
}

impl Transcript {
    fn append(&self, text: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        let scrubbed = scrub_sentinels(text);
        for line in scrubbed.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if self.show_elapsed_time {
                let elapsed = self.started.elapsed().as_secs_f64();
                sink.append_line(&format!("[{elapsed:>8.3}s] {line}"));
            } else {
                sink.append_line(line);
            }
        }
    }
}

/// State shared between the session handle and its background tasks.
struct Shared {
    kill_requested: AtomicBool,
    last_fault: Mutex<Option<ProcessFault>>,
    state_tx: watch::Sender<ProcessState>,
    fault_tx: broadcast::Sender<ProcessFault>,
    transcript: Transcript,
}

impl Shared {
    /// Move to `next` unless a terminal state was already reached.
    fn transition(&self, next: ProcessState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "Process state transition");
            *state = next;
            true
        })
    }

    fn report(&self, fault: ProcessFault) {
        self.transcript.append(&fault.to_string());
        if let Ok(mut last) = self.last_fault.lock() {
            *last = Some(fault.clone());
        }
        // No listeners is fine: the fault is still recorded above.
        let _ = self.fault_tx.send(fault);
    }
}

/// A running REPL process and its event channels.
pub struct ProcessSession {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    pid: u32,
    started_at: DateTime<Utc>,
    stdout_tx: broadcast::Sender<String>,
    stderr_tx: broadcast::Sender<String>,
    state_rx: watch::Receiver<ProcessState>,
    stdin_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    kill_token: CancellationToken,
}

impl ProcessSession {
    /// Spawn the process described by `options`.
    ///
    /// The command runs directly, without a shell in between, so a missing
    /// executable is reported as a startup error.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::Startup` if the executable cannot be found, the
    /// spawn fails, or no process id appears within the startup window.
    pub async fn create(options: ProcessOptions) -> Result<Self, ShellError> {
        let command_line = display_command_line(&options.command, &options.args);
        let transcript = Transcript {
            sink: options.sink.clone(),
            started: Instant::now(),
            show_elapsed_time: options.show_elapsed_time,
        };
        transcript.append(&format!("Starting {command_line}"));
        tracing::info!(command = %command_line, "Spawning REPL process");

        let mut cmd = Command::new(&options.command);
        cmd.args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&options.command, &e))?;

        let pid = wait_for_pid(&mut child, options.startup_timeout).await?;
        tracing::info!(pid, command = %options.command, "REPL process started");

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(ShellError::Startup(
                "process pipes were not available".to_string(),
            ));
        };

        let (stdout_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stderr_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (fault_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ProcessState::Starting);
        let shared = Arc::new(Shared {
            kill_requested: AtomicBool::new(false),
            last_fault: Mutex::new(None),
            state_tx,
            fault_tx,
            transcript,
        });
        shared.transition(ProcessState::Running);

        let readers = [
            tokio::spawn(pump(stdout, stdout_tx.clone(), Arc::clone(&shared), "stdout")),
            tokio::spawn(pump(stderr, stderr_tx.clone(), Arc::clone(&shared), "stderr")),
        ];

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_stdin(stdin, stdin_rx, Arc::clone(&shared)));

        let kill_token = CancellationToken::new();
        tokio::spawn(monitor(
            child,
            readers,
            Arc::clone(&shared),
            kill_token.clone(),
            options.kill_grace,
        ));

        Ok(Self {
            command: options.command,
            args: options.args,
            working_dir: options.working_dir,
            pid,
            started_at: Utc::now(),
            stdout_tx,
            stderr_tx,
            state_rx,
            stdin_tx,
            shared,
            kill_token,
        })
    }

    /// Queue `text` plus the platform line terminator for stdin.
    ///
    /// Never blocks and never fails inline. A write failure shows up later on
    /// the fault channel.
    pub fn write_line(&self, text: &str) {
        let line = format!("{text}{LINE_ENDING}");
        if self.stdin_tx.send(line).is_err() {
            tracing::debug!(pid = self.pid, "Dropping write to finished process");
        }
    }

    /// Listen for stdout chunks emitted from now on.
    #[must_use]
    pub fn subscribe_stdout(&self) -> broadcast::Receiver<String> {
        self.stdout_tx.subscribe()
    }

    /// Listen for stderr chunks emitted from now on.
    #[must_use]
    pub fn subscribe_stderr(&self) -> broadcast::Receiver<String> {
        self.stderr_tx.subscribe()
    }

    /// Listen for fatal faults emitted from now on.
    #[must_use]
    pub fn subscribe_faults(&self) -> broadcast::Receiver<ProcessFault> {
        self.shared.fault_tx.subscribe()
    }

    /// Watch the lifecycle state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Total number of live stdout, stderr and fault listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.stdout_tx.receiver_count()
            + self.stderr_tx.receiver_count()
            + self.shared.fault_tx.receiver_count()
    }

    /// Request termination. The resulting exit is not reported as a fault.
    pub fn kill(&self) {
        if self.state().is_terminal() {
            return;
        }
        if !self.shared.kill_requested.swap(true, Ordering::SeqCst) {
            tracing::info!(pid = self.pid, "Killing REPL process");
            self.shared.transcript.append("Stopping process");
        }
        self.kill_token.cancel();
    }

    /// Wait until the process reaches a terminal state.
    pub async fn wait(&self) -> ProcessState {
        let mut state_rx = self.state_rx.clone();
        let state = match state_rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => *self.state_rx.borrow(),
        };
        state
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The last fatal fault, if the process has failed.
    #[must_use]
    pub fn last_fault(&self) -> Option<ProcessFault> {
        self.shared
            .last_fault
            .lock()
            .ok()
            .and_then(|fault| fault.clone())
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append a line to the transcript, with sentinels scrubbed.
    pub fn log(&self, text: &str) {
        self.shared.transcript.append(text);
    }

    #[must_use]
    pub fn has_output_sink(&self) -> bool {
        self.shared.transcript.sink.is_some()
    }
}

impl fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSession")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.shared.kill_requested.store(true, Ordering::SeqCst);
        self.kill_token.cancel();
    }
}

impl ScriptHost for ProcessSession {
    fn subscribe(&self) -> Subscription {
        Subscription {
            stdout: self.subscribe_stdout(),
            stderr: self.subscribe_stderr(),
            faults: self.subscribe_faults(),
            state: self.watch_state(),
        }
    }

    fn write_line(&self, text: &str) {
        ProcessSession::write_line(self, text);
    }

    fn last_fault(&self) -> Option<ProcessFault> {
        ProcessSession::last_fault(self)
    }

    fn has_output_log(&self) -> bool {
        self.has_output_sink()
    }

    fn log(&self, text: &str) {
        ProcessSession::log(self, text);
    }
}

fn spawn_error(command: &str, err: &std::io::Error) -> ShellError {
    tracing::warn!(command, error = %err, "Failed to spawn REPL process");
    match err.kind() {
        std::io::ErrorKind::NotFound => ShellError::Startup(format!("could not find {command}")),
        std::io::ErrorKind::PermissionDenied => {
            ShellError::Startup(format!("permission denied running {command}"))
        }
        _ => ShellError::Startup(format!("failed to start {command}: {err}")),
    }
}

async fn wait_for_pid(child: &mut Child, window: Duration) -> Result<u32, ShellError> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        if let Some(pid) = child.id() {
            return Ok(pid);
        }
        if tokio::time::Instant::now() >= deadline {
            let _ = child.start_kill();
            return Err(ShellError::Startup(format!(
                "process did not start within {} seconds",
                window.as_secs()
            )));
        }
        tokio::time::sleep(PID_POLL_INTERVAL).await;
    }
}

/// Forward decoded chunks from one pipe to its broadcast channel.
async fn pump<R>(
    mut reader: R,
    tx: broadcast::Sender<String>,
    shared: Arc<Shared>,
    stream: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8ChunkDecoder::new();
    // The transcript only sees whole lines, so a marker split by a read
    // boundary is still scrubbed.
    let mut lines = LineBuffer::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    if let Some(complete) = lines.push(&text) {
                        shared.transcript.append(&complete);
                    }
                    let _ = tx.send(text);
                }
            }
            Err(e) => {
                tracing::debug!(stream, error = %e, "Pipe read failed");
                break;
            }
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        if let Some(complete) = lines.push(&rest) {
            shared.transcript.append(&complete);
        }
        let _ = tx.send(rest);
    }
    if let Some(tail) = lines.finish() {
        shared.transcript.append(&tail);
    }
    tracing::trace!(stream, "Pipe closed");
}

async fn write_stdin(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    while let Some(line) = rx.recv().await {
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Write to REPL stdin failed");
            let fault = if e.kind() == std::io::ErrorKind::BrokenPipe {
                ProcessFault::BrokenPipe
            } else {
                ProcessFault::Io(format!("failed to write to process: {e}"))
            };
            shared.report(fault);
        }
    }
}

/// Own the child until it exits, then classify the exit.
async fn monitor(
    mut child: Child,
    readers: [JoinHandle<()>; 2],
    shared: Arc<Shared>,
    kill_token: CancellationToken,
    kill_grace: Duration,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill_token.cancelled() => {
            if let Err(e) = terminate(&mut child, kill_grace).await {
                tracing::warn!(error = %e, "Failed to terminate REPL process");
            }
            child.wait().await
        }
    };

    // Output flushed right before exit must reach listeners before the fault.
    for reader in readers {
        let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
    }

    if shared.kill_requested.load(Ordering::SeqCst) {
        tracing::info!(status = ?status.as_ref().ok(), "REPL process stopped");
        shared.transition(ProcessState::Killed);
        return;
    }

    match status {
        Ok(status) => {
            tracing::warn!(code = ?status.code(), "REPL process exited unexpectedly");
            shared.report(exit_fault(status));
            shared.transition(ProcessState::Exited);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to wait on REPL process");
            shared.report(ProcessFault::Io(format!("failed to wait on process: {e}")));
            shared.transition(ProcessState::Errored);
        }
    }
}

fn exit_fault(status: ExitStatus) -> ProcessFault {
    ProcessFault::Exited {
        code: status.code(),
    }
}

/// SIGTERM first, then a hard kill once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => child.kill().await,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await
    }
}
