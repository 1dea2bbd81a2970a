//! dbshell-driver - run scripts against a database shell from the command line.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dbshell_driver::codec::DialectKind;
use dbshell_driver::config::{ConfigLoader, DriverConfig};
use dbshell_driver::output::{OutputSink, StderrSink, TracingSink};
use dbshell_driver::shell::{
    redact_args, redact_credentials, ExecutableResolver, PathPrompt, ShellOptions, ShellSession,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    Mongosh,
    Legacy,
}

impl From<DialectArg> for DialectKind {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Mongosh => DialectKind::Mongosh,
            DialectArg::Legacy => DialectKind::Legacy,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "dbshell-driver",
    about = "Run scripts against an interactive database shell",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shell executable to run.
    #[arg(long, global = true)]
    shell: Option<String>,

    /// Shell dialect.
    #[arg(long, value_enum, global = true)]
    dialect: Option<DialectArg>,

    /// Per-script timeout in seconds (0 disables it).
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Accept invalid TLS certificates.
    #[arg(long, global = true)]
    insecure_tls: bool,

    /// Print the shell transcript to stderr instead of the log.
    #[arg(long, global = true)]
    transcript: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more scripts and print each result.
    Exec {
        /// Connection string or host.
        target: String,
        /// Scripts to run, in order.
        #[arg(required = true)]
        scripts: Vec<String>,
        /// Pretty-print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Read scripts line by line from stdin.
    Repl {
        /// Connection string or host.
        target: String,
    },
}

/// Asks on stdin for the shell path when none is found.
struct StdinPrompt;

impl PathPrompt for StdinPrompt {
    fn prompt_for_path(&self, candidates: &[String]) -> Option<String> {
        eprint!(
            "{} none of {} found on PATH. Shell executable: ",
            "?".yellow().bold(),
            candidates.join(", ")
        );
        std::io::stderr().flush().ok()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok()?;
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<DriverConfig, String> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().map_err(|e| e.to_string())?;

    if let Some(shell) = &cli.shell {
        config.shell.path = Some(shell.clone());
    }
    if let Some(dialect) = cli.dialect {
        config.shell.dialect = dialect.into();
    }
    if let Some(timeout) = cli.timeout {
        config.shell.timeout_secs = timeout;
    }
    if cli.insecure_tls {
        config.shell.tls_allow_invalid_certificates = true;
    }
    Ok(config)
}

async fn connect(
    config: &DriverConfig,
    target: &str,
    sink: Arc<dyn OutputSink>,
) -> Result<ShellSession, String> {
    let resolver = ExecutableResolver::new();
    let executable = resolver
        .resolve(config.shell.path.as_deref(), &StdinPrompt)
        .map_err(|e| e.to_string())?;

    tracing::info!(
        executable = %executable,
        target = %redact_credentials(target),
        "Connecting"
    );
    let options = ShellOptions::from_config(&config.shell, executable, target)
        .output_sink(sink);
    let session = ShellSession::create(options)
        .await
        .map_err(|e| e.to_string())?;

    let process = session.process();
    tracing::info!(
        pid = process.pid(),
        command = process.command(),
        args = ?redact_args(process.args()),
        working_dir = ?process.working_dir(),
        started_at = %process.started_at(),
        "Shell session started"
    );
    Ok(session)
}

async fn run_exec(session: &ShellSession, scripts: &[String], json: bool) -> Result<(), String> {
    for script in scripts {
        if json {
            let value = session
                .execute_json(script)
                .await
                .map_err(|e| e.to_string())?;
            let pretty = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
            println!("{pretty}");
        } else {
            let output = session
                .execute_script(script)
                .await
                .map_err(|e| e.to_string())?;
            if !output.is_empty() {
                println!("{output}");
            }
        }
    }
    Ok(())
}

async fn run_repl(session: &ShellSession) -> Result<(), String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        if line.trim().is_empty() {
            continue;
        }
        match session.execute_script(&line).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{output}"),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;
    let sink: Arc<dyn OutputSink> = if cli.transcript {
        Arc::new(StderrSink)
    } else {
        Arc::new(TracingSink)
    };

    match cli.command {
        Commands::Exec {
            target,
            scripts,
            json,
        } => {
            let session = connect(&config, &target, sink).await?;
            let result = run_exec(&session, &scripts, json).await;
            session.dispose();
            result
        }
        Commands::Repl { target } => {
            let session = connect(&config, &target, sink).await?;
            let result = run_repl(&session).await;
            session.dispose();
            result
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
