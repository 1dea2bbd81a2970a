//! End-to-end scenarios through the `ShellSession` facade.

use std::sync::Arc;
use std::time::Duration;

use dbshell_driver::codec::{ResponseCodec, TRUNCATION_MARKER};
use dbshell_driver::output::MemorySink;
use dbshell_driver::process::ProcessState;
use dbshell_driver::shell::{ErrorKind, ShellError, ShellOptions, ShellSession, ShellState};
use serde_json::json;

use crate::support::{shell_options, stub_repl, stub_script};

#[tokio::test]
async fn create_completes_handshake() {
    let stub = stub_repl();
    let session = tokio_test::assert_ok!(ShellSession::create(shell_options(&stub)).await);

    assert_eq!(session.state(), ShellState::Ready);
    assert_eq!(session.process().state(), ProcessState::Running);
    assert_eq!(session.process().listener_count(), 0);
}

#[tokio::test]
async fn batch_size_leaves_the_lazy_cap_alone() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub).batch_size(20))
        .await
        .unwrap();
    assert!(session.codec().helper_script().contains("items.length < 50 "));

    let session = ShellSession::create(shell_options(&stub).batch_size(20).lazy_cap(7))
        .await
        .unwrap();
    assert!(session.codec().helper_script().contains("items.length < 7 "));
}

#[tokio::test]
async fn use_database_switches() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    let output = session.use_database("testdb").await.unwrap();
    assert_eq!(output, "switched to db testdb");
}

#[tokio::test]
async fn empty_script_returns_empty_string() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    assert_eq!(session.execute_script("").await.unwrap(), "");
    assert_eq!(session.execute_script("   ").await.unwrap(), "");
}

#[tokio::test]
async fn execute_json_parses_output() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    let value = session.execute_json("db.stats()").await.unwrap();
    assert_eq!(value, json!({ "ok": 1, "count": 3 }));
}

#[tokio::test]
async fn concurrent_scripts_run_one_at_a_time() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    let (a, b, c) = tokio::join!(
        session.use_database("alpha"),
        session.use_database("beta"),
        session.use_database("gamma"),
    );

    assert_eq!(a.unwrap(), "switched to db alpha");
    assert_eq!(b.unwrap(), "switched to db beta");
    assert_eq!(c.unwrap(), "switched to db gamma");
}

#[tokio::test]
async fn script_errors_keep_the_session_usable() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    let err = session.execute_script("fail").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);

    // The failed run's sentinel is echoed late and must not leak into this result.
    let output = session.use_database("after").await.unwrap();
    assert_eq!(output, "switched to db after");
}

#[tokio::test]
async fn transcript_shows_scripts_and_output() {
    let stub = stub_repl();
    let sink = MemorySink::new();
    let session = ShellSession::create(shell_options(&stub).output_sink(Arc::new(sink.clone())))
        .await
        .unwrap();

    session.use_database("testdb").await.unwrap();

    let lines = sink.lines();
    assert!(lines.iter().any(|line| line == "> use testdb"));
    assert!(lines.iter().any(|line| line == "switched to db testdb"));
    assert!(!sink.contents().contains("EXECUTION COMPLETED"));
}

#[tokio::test]
async fn dispose_is_idempotent_and_terminal() {
    let stub = stub_repl();
    let session = ShellSession::create(shell_options(&stub)).await.unwrap();

    session.dispose();
    session.dispose();
    session.kill();
    assert_eq!(session.state(), ShellState::Disposed);

    let err = session.execute_script("use testdb").await.unwrap_err();
    assert_eq!(
        err,
        ShellError::Process("shell session has been disposed".to_string())
    );

    let state = tokio::time::timeout(Duration::from_secs(10), session.process().wait())
        .await
        .unwrap();
    assert_eq!(state, ProcessState::Killed);
}

#[tokio::test]
async fn missing_executable_is_a_startup_error() {
    let options = ShellOptions::new("/nonexistent/bin/mongosh", "mongodb://localhost:27017");

    let err = ShellSession::create(options).await.unwrap_err();
    assert_eq!(
        err,
        ShellError::Startup("could not find /nonexistent/bin/mongosh".to_string())
    );
}

#[tokio::test]
async fn early_exit_fails_startup() {
    let stub = stub_script("exit 2\n");

    let err = ShellSession::create(shell_options(&stub)).await.unwrap_err();
    assert_eq!(
        err,
        ShellError::Startup("process exited with code 2".to_string())
    );
}

#[tokio::test]
async fn unresponsive_shell_times_out_during_startup() {
    let stub = stub_script("while IFS= read -r line; do :; done\n");

    let err = ShellSession::create(shell_options(&stub).timeout_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Startup);
    assert!(err.message().starts_with("Timed out executing script after 1 seconds."));
}

#[tokio::test]
async fn lazy_sequences_are_capped() {
    let Ok(node) = which::which("node") else {
        eprintln!("node is not installed; skipping");
        return;
    };

    let codec = ResponseCodec::default();
    let program = format!(
        "var print = console.log; var EJSON = JSON;\n\
         {}\n\
         var n = 0;\n\
         var cursor = {{ hasNext: function () {{ return n < 120; }}, next: function () {{ return n++; }} }};\n\
         {}\n",
        codec.helper_script(),
        codec.encode("cursor"),
    );

    let output = tokio::process::Command::new(node)
        .arg("-e")
        .arg(program)
        .output()
        .await
        .unwrap();
    assert!(output.status.success());

    let value = codec
        .decode_json(&String::from_utf8_lossy(&output.stdout))
        .unwrap();
    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 51);
    assert_eq!(items[0], json!(0));
    assert_eq!(items[49], json!(49));
    assert_eq!(items[50], json!(TRUNCATION_MARKER));
}
