#![cfg(unix)]
//! Native command execution through the local shell.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ti_core::test_support::{LogLevel, RecordingLog};
use ti_core::OsFamily;
use ti_runner::{CommandExecutor, CommandOutcome, CommandRequest, LocalShellExecutor};
use tokio_util::sync::CancellationToken;

fn request(script: &str, dir: &std::path::Path) -> CommandRequest {
    CommandRequest {
        script: script.to_string(),
        working_dir: dir.to_path_buf(),
        os: OsFamily::Unix,
    }
}

#[tokio::test]
async fn output_lines_are_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let log = RecordingLog::new();

    let outcome = LocalShellExecutor::new()
        .execute(
            &request("echo hello; echo oops >&2", dir.path()),
            log.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Exited(0));
    assert!(log.contains(LogLevel::Stdout, "hello"));
    assert!(log.contains(LogLevel::Stderr, "oops"));
}

#[tokio::test]
async fn command_runs_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let log = RecordingLog::new();

    LocalShellExecutor::new()
        .execute(&request("echo data > marker.txt", dir.path()), log, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("marker.txt")).unwrap(), "data\n");
}

#[tokio::test]
async fn non_zero_exit_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = LocalShellExecutor::new()
        .execute(&request("exit 3", dir.path()), RecordingLog::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Exited(3));
}

#[tokio::test]
async fn cancellation_stops_long_running_command() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = LocalShellExecutor::new()
        .execute(&request("sleep 30", dir.path()), RecordingLog::new(), cancel)
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn cancellation_reaches_output_held_open_by_background_process() {
    let dir = tempfile::tempdir().unwrap();
    let log = RecordingLog::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = LocalShellExecutor::new()
        .execute(&request("sleep 6 & echo started", dir.path()), log.clone(), cancel)
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    assert!(log.contains(LogLevel::Stdout, "started"));
}

#[tokio::test]
async fn nothing_is_spawned_when_already_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = LocalShellExecutor::new()
        .execute(&request("touch spawned", dir.path()), RecordingLog::new(), cancel)
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Cancelled);
    assert!(!dir.path().join("spawned").exists());
}
