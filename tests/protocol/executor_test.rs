//! Single-script execution against a live process.

use std::sync::Arc;

use dbshell_driver::output::MemorySink;
use dbshell_driver::process::ProcessSession;
use dbshell_driver::protocol::{ScriptExecutor, Sentinel, SENTINEL_PREFIX};
use dbshell_driver::shell::{ErrorKind, ShellError, OUTPUT_LOG_HINT};

use crate::support::{process_options, stub_repl};

async fn run(session: &ProcessSession, script: &str, timeout_secs: u64) -> Result<String, ShellError> {
    ScriptExecutor::new()
        .execute(session, script, &Sentinel::generate(), timeout_secs)
        .await
}

#[tokio::test]
async fn output_before_sentinel_is_returned() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let output = run(&session, "use testdb", 10).await.unwrap();
    assert_eq!(output, "switched to db testdb\n");
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn empty_script_round_trips() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    assert_eq!(run(&session, "", 10).await.unwrap(), "");
}

#[tokio::test]
async fn sequential_scripts_do_not_bleed() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    assert_eq!(run(&session, "use a", 10).await.unwrap(), "switched to db a\n");
    assert_eq!(run(&session, "use b", 10).await.unwrap(), "switched to db b\n");
    assert_eq!(run(&session, "", 10).await.unwrap(), "");
}

#[tokio::test]
async fn more_prompt_is_rewritten() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let output = run(&session, "more", 10).await.unwrap();
    assert_eq!(output, "1\n2\n(more)\n");
}

#[tokio::test]
async fn benign_stderr_is_ignored() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    assert_eq!(run(&session, "benign", 10).await.unwrap(), "");
}

#[tokio::test]
async fn real_stderr_fails_with_that_line() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let err = tokio_test::assert_err!(run(&session, "fail", 10).await);
    assert_eq!(
        err,
        ShellError::Script("MongoServerError: ns not found".to_string())
    );
}

#[tokio::test]
async fn output_log_hint_added_with_a_sink() {
    let stub = stub_repl();
    let sink = MemorySink::new();
    let session = ProcessSession::create(process_options(&stub).output_sink(Arc::new(sink.clone())))
        .await
        .unwrap();

    let err = run(&session, "fail", 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert_eq!(
        err.message(),
        format!("MongoServerError: ns not found{OUTPUT_LOG_HINT}")
    );
    assert!(sink.contents().contains("MongoServerError: ns not found"));
}

#[tokio::test]
async fn transcript_never_shows_sentinels() {
    let stub = stub_repl();
    let sink = MemorySink::new();
    let session = ProcessSession::create(process_options(&stub).output_sink(Arc::new(sink.clone())))
        .await
        .unwrap();

    run(&session, "use testdb", 10).await.unwrap();

    let contents = sink.contents();
    assert!(contents.contains("switched to db testdb"));
    assert!(!contents.contains(SENTINEL_PREFIX.trim()));
}

#[tokio::test]
async fn transcript_scrubs_marker_split_across_reads() {
    let stub = stub_repl();
    let sink = MemorySink::new();
    let session = ProcessSession::create(process_options(&stub).output_sink(Arc::new(sink.clone())))
        .await
        .unwrap();

    let output = run(&session, "straddle", 10).await.unwrap();
    assert_eq!(output, "bbbb\n");

    let contents = sink.contents();
    assert!(contents.contains("bbbb"));
    assert!(!contents.contains("EXECUTION COMP"));
    assert!(!contents.contains("LETED 0123456789"));
}

#[tokio::test]
async fn large_result_arrives_whole() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let output = tokio::time::timeout(std::time::Duration::from_secs(30), run(&session, "big", 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.len(), 2 * 1024 * 1024 + 1);
    assert!(output.trim_end().bytes().all(|b| b == b'b'));
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn timeout_fires_and_releases_listeners() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let err = run(&session, "mute", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err
        .message()
        .starts_with("Timed out executing script after 1 seconds."));
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn exit_during_script_is_a_process_error() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let err = run(&session, "exit 3", 10).await.unwrap_err();
    assert_eq!(
        err,
        ShellError::Process("process exited with code 3".to_string())
    );
}

#[tokio::test]
async fn script_after_exit_fails_fast() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();
    session.write_line("exit 4");
    session.wait().await;

    let err = run(&session, "use testdb", 10).await.unwrap_err();
    assert_eq!(
        err,
        ShellError::Process("process exited with code 4".to_string())
    );
}

#[tokio::test]
async fn kill_during_script_is_reported_as_killed() {
    let stub = stub_repl();
    let session = ProcessSession::create(process_options(&stub)).await.unwrap();

    let (result, ()) = tokio::join!(run(&session, "mute", 0), async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        session.kill();
    });

    assert_eq!(
        result.unwrap_err(),
        ShellError::Process("process was killed".to_string())
    );
}
