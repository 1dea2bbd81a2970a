//! Lifecycle and exit classification of a live process.

use std::sync::Arc;
use std::time::Duration;

use dbshell_driver::output::MemorySink;
use dbshell_driver::process::{ProcessFault, ProcessSession, ProcessState};
use tokio::sync::broadcast::error::TryRecvError;

use crate::support::{process_options, stub_repl};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn spawned_process_is_running() {
    let stub = stub_repl();
    let session = tokio_test::assert_ok!(ProcessSession::create(process_options(&stub)).await);

    assert_eq!(session.state(), ProcessState::Running);
    assert!(session.pid() > 0);
    assert_eq!(session.command(), "bash");
    assert!(session.last_fault().is_none());
    session.kill();
}

#[tokio::test]
async fn kill_reports_no_fault() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    let mut faults = session.subscribe_faults();

    session.kill();
    session.kill();
    let state = tokio::time::timeout(WAIT, session.wait()).await.unwrap();

    assert_eq!(state, ProcessState::Killed);
    assert!(matches!(faults.try_recv(), Err(TryRecvError::Empty)));
    assert!(session.last_fault().is_none());
}

#[tokio::test]
async fn wait_after_exit_returns_the_final_state() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    session.write_line("exit 2");
    let first = tokio::time::timeout(WAIT, session.wait()).await.unwrap();
    let second = tokio::time::timeout(Duration::from_millis(100), session.wait())
        .await
        .unwrap();

    assert_eq!(first, ProcessState::Exited);
    assert_eq!(second, first);
}

#[tokio::test]
async fn nonzero_exit_is_reported_with_code() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    let mut faults = session.subscribe_faults();

    session.write_line("exit 1");
    let state = tokio::time::timeout(WAIT, session.wait()).await.unwrap();

    assert_eq!(state, ProcessState::Exited);
    let fault = faults.recv().await.unwrap();
    assert_eq!(fault, ProcessFault::Exited { code: Some(1) });
    assert_eq!(fault.to_string(), "process exited with code 1");
    assert_eq!(session.last_fault(), Some(fault));
}

#[tokio::test]
async fn clean_exit_is_still_premature() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    let mut faults = session.subscribe_faults();

    session.write_line("exit 0");
    tokio::time::timeout(WAIT, session.wait()).await.unwrap();

    let fault = faults.recv().await.unwrap();
    assert_eq!(fault.to_string(), "process exited prematurely");
}

#[tokio::test]
async fn stdout_is_broadcast_to_every_listener() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    let mut first = session.subscribe_stdout();
    let mut second = session.subscribe_stdout();

    session.write_line("use admin");

    let a = tokio::time::timeout(WAIT, first.recv()).await.unwrap().unwrap();
    let b = tokio::time::timeout(WAIT, second.recv()).await.unwrap().unwrap();
    assert_eq!(a, "switched to db admin\n");
    assert_eq!(a, b);

    drop(first);
    drop(second);
    assert_eq!(session.listener_count(), 0);
    session.kill();
}

#[tokio::test]
async fn transcript_records_start_and_stop() {
    let stub = stub_repl();
    let sink = MemorySink::new();
    let session = ProcessSession::create(process_options(&stub).output_sink(Arc::new(sink.clone())))
        .await
        .unwrap();
    assert!(session.has_output_sink());

    session.kill();
    tokio::time::timeout(WAIT, session.wait()).await.unwrap();

    let lines = sink.lines();
    assert!(lines[0].starts_with("Starting bash "));
    assert!(lines.iter().any(|line| line == "Stopping process"));
}

#[tokio::test]
async fn drop_kills_the_process() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    let mut state = session.watch_state();

    drop(session);

    let reached = tokio::time::timeout(WAIT, state.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .map(|s| *s);
    assert_eq!(reached.unwrap(), ProcessState::Killed);
}
