//! The public facade over one long-lived database shell process.
//!
//! A [`ShellSession`] is only handed out once the shell has proven it is
//! alive: the lazy-sequence helper is installed, an empty script round-trips,
//! and the batch size is configured. After that, scripts run strictly one at
//! a time; concurrent callers queue up in arrival order.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{DialectKind, ReplDialect, ResponseCodec};
use crate::config::ShellConfig;
use crate::output::OutputSink;
use crate::process::{ProcessOptions, ProcessSession};
use crate::protocol::{ScriptExecutor, Sentinel};
use crate::shell::{ShellArgs, ShellError};

/// Lifecycle of a [`ShellSession`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellState {
    #[default]
    Created,
    Starting,
    Ready,
    Disposed,
}

/// Everything needed to start a [`ShellSession`].
#[derive(Clone)]
pub struct ShellOptions {
    executable: String,
    args: Vec<String>,
    connection_target: String,
    working_dir: Option<String>,
    sink: Option<Arc<dyn OutputSink>>,
    timeout_secs: u64,
    startup_timeout: Duration,
    batch_size: u32,
    lazy_cap: u32,
    dialect: Arc<dyn ReplDialect>,
    allow_invalid_certificates: bool,
    show_elapsed_time: bool,
}

impl ShellOptions {
    /// Options with defaults for everything but the executable and target.
    #[must_use]
    pub fn new(executable: impl Into<String>, connection_target: impl Into<String>) -> Self {
        Self::from_config(&ShellConfig::default(), executable, connection_target)
    }

    /// Options taken from a loaded [`ShellConfig`].
    #[must_use]
    pub fn from_config(
        config: &ShellConfig,
        executable: impl Into<String>,
        connection_target: impl Into<String>,
    ) -> Self {
        Self {
            executable: executable.into(),
            args: config.args.clone(),
            connection_target: connection_target.into(),
            working_dir: None,
            sink: None,
            timeout_secs: config.timeout_secs,
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            batch_size: config.batch_size,
            lazy_cap: config.lazy_cap,
            dialect: config.dialect.dialect(),
            allow_invalid_certificates: config.tls_allow_invalid_certificates,
            show_elapsed_time: config.show_elapsed_time,
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

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Per-script timeout; 0 disables it.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Most items materialized from one lazy sequence.
    #[must_use]
    pub fn lazy_cap(mut self, cap: u32) -> Self {
        self.lazy_cap = cap;
        self
    }

    #[must_use]
    pub fn dialect(mut self, kind: DialectKind) -> Self {
        self.dialect = kind.dialect();
        self
    }

    /// Use a custom dialect implementation.
    #[must_use]
    pub fn custom_dialect(mut self, dialect: Arc<dyn ReplDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn allow_invalid_certificates(mut self, allow: bool) -> Self {
        self.allow_invalid_certificates = allow;
        self
    }

    #[must_use]
    pub fn show_elapsed_time(mut self, show: bool) -> Self {
        self.show_elapsed_time = show;
        self
    }

    /// The full argument list, connection target last.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        ShellArgs::new()
            .args(self.args.iter().cloned())
            .allow_invalid_certificates(self.allow_invalid_certificates)
            .target(self.connection_target.clone())
            .build_args()
    }

    fn process_options(&self) -> ProcessOptions {
        let mut options = ProcessOptions::new(self.executable.clone())
            .args(self.build_args())
            .startup_timeout(self.startup_timeout)
            .show_elapsed_time(self.show_elapsed_time);
        if let Some(dir) = &self.working_dir {
            options = options.working_dir(dir.clone());
        }
        if let Some(sink) = &self.sink {
            options = options.output_sink(Arc::clone(sink));
        }
        options
    }
}

impl fmt::Debug for ShellOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellOptions")
            .field("executable", &self.executable)
            .field("dialect", &self.dialect.name())
            .field("timeout_secs", &self.timeout_secs)
            .field("batch_size", &self.batch_size)
            .field("lazy_cap", &self.lazy_cap)
            .finish_non_exhaustive()
    }
}

/// A ready-to-use database shell.
pub struct ShellSession {
    process: ProcessSession,
    codec: ResponseCodec,
    executor: ScriptExecutor,
    timeout_secs: u64,
    state: Mutex<ShellState>,
    queue: tokio::sync::Mutex<()>,
}

impl ShellSession {
    /// Start the shell and complete the startup handshake.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::Startup` if the process cannot be spawned or any
    /// handshake script fails. The process is killed in that case.
    pub async fn create(options: ShellOptions) -> Result<Self, ShellError> {
        let process = ProcessSession::create(options.process_options()).await?;
        let session = Self {
            process,
            codec: ResponseCodec::new(Arc::clone(&options.dialect))
                .with_lazy_cap(options.lazy_cap),
            executor: ScriptExecutor::new(),
            timeout_secs: options.timeout_secs,
            state: Mutex::new(ShellState::Created),
            queue: tokio::sync::Mutex::new(()),
        };

        session.transition(ShellState::Starting);
        if let Err(e) = session.start(options.batch_size).await {
            tracing::warn!(error = %e, "Shell startup failed");
            session.process.kill();
            session.transition(ShellState::Disposed);
            return Err(e.into_startup());
        }
        session.transition(ShellState::Ready);

        tracing::info!(
            pid = session.process.pid(),
            dialect = session.codec.dialect().name(),
            "Shell session ready"
        );
        Ok(session)
    }

    async fn start(&self, batch_size: u32) -> Result<(), ShellError> {
        self.run(&self.codec.helper_script()).await?;
        self.run("").await?;
        self.run(&self.codec.config_script(batch_size)).await?;
        Ok(())
    }

    /// Run `script` and return its normalized output.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::Script`, `ShellError::Process` or
    /// `ShellError::Timeout` as described on [`ScriptExecutor::execute`].
    pub async fn execute_script(&self, script: &str) -> Result<String, ShellError> {
        let raw = self.execute_raw(script).await?;
        Ok(self.codec.decode(&raw))
    }

    /// Run `script` and parse its output as JSON.
    ///
    /// # Errors
    ///
    /// As [`ShellSession::execute_script`], plus `ShellError::Script` when the
    /// output is not JSON.
    pub async fn execute_json(&self, script: &str) -> Result<serde_json::Value, ShellError> {
        let raw = self.execute_raw(script).await?;
        self.codec.decode_json(&raw)
    }

    /// Switch the current database.
    ///
    /// # Errors
    ///
    /// As [`ShellSession::execute_script`].
    pub async fn use_database(&self, name: &str) -> Result<String, ShellError> {
        self.execute_script(&format!("use {name}")).await
    }

    async fn execute_raw(&self, script: &str) -> Result<String, ShellError> {
        let _turn = self.queue.lock().await;
        if self.state() == ShellState::Disposed {
            return Err(ShellError::Process(
                "shell session has been disposed".to_string(),
            ));
        }
        if !script.trim().is_empty() {
            self.process.log(&format!("> {}", script.trim()));
        }
        self.run(&self.codec.encode(script)).await
    }

    async fn run(&self, script: &str) -> Result<String, ShellError> {
        let sentinel = Sentinel::generate();
        self.executor
            .execute(&self.process, script, &sentinel, self.timeout_secs)
            .await
    }

    /// Kill the shell. Idempotent; the session cannot be used afterwards.
    pub fn dispose(&self) {
        if self.transition(ShellState::Disposed) {
            self.process.kill();
        }
    }

    /// Alias for [`ShellSession::dispose`].
    pub fn kill(&self) {
        self.dispose();
    }

    #[must_use]
    pub fn state(&self) -> ShellState {
        self.state
            .lock()
            .map_or(ShellState::Disposed, |state| *state)
    }

    /// The underlying process, for diagnostics.
    #[must_use]
    pub fn process(&self) -> &ProcessSession {
        &self.process
    }

    #[must_use]
    pub fn codec(&self) -> &ResponseCodec {
        &self.codec
    }

    /// Returns false if already disposed.
    fn transition(&self, next: ShellState) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if *state == ShellState::Disposed {
            return false;
        }
        tracing::debug!(from = ?*state, to = ?next, "Shell state transition");
        *state = next;
        true
    }
}

impl fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSession")
            .field("state", &self.state())
            .field("process", &self.process)
            .field("dialect", &self.codec.dialect().name())
            .finish_non_exhaustive()
    }
}
