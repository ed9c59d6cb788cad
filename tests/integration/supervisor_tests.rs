//! Process supervision against real `sh` subprocesses.

#![cfg(unix)]

use std::collections::HashMap;
use std::time::Duration;

use agent_bridge::config::RestartConfig;
use agent_bridge::process::{ProcessEvent, ProcessStatus, ProcessSupervisor, SpawnConfig};
use agent_bridge::AppError;
use tokio::sync::mpsc;

use super::support::STEP_TIMEOUT;

fn shell(script: &str, dir: &std::path::Path) -> SpawnConfig {
    SpawnConfig {
        executable: "sh".into(),
        args: vec!["-c".into(), script.into()],
        env: HashMap::from([("EXTRA".to_owned(), "yes".to_owned())]),
        working_directory: dir.to_path_buf(),
    }
}

fn supervisor(max_attempts: u32, ready_timeout: Duration) -> ProcessSupervisor {
    ProcessSupervisor::new(
        RestartConfig {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
        },
        ready_timeout,
    )
}

async fn next_event(rx: &mut mpsc::Receiver<ProcessEvent>) -> ProcessEvent {
    tokio::time::timeout(STEP_TIMEOUT, rx.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

/// Read output events until the accumulated text contains `needle`.
async fn output_until(rx: &mut mpsc::Receiver<ProcessEvent>, needle: &str) -> String {
    let mut text = String::new();
    while !text.contains(needle) {
        if let ProcessEvent::Output(bytes) = next_event(rx).await {
            text.push_str(&String::from_utf8_lossy(&bytes));
        }
    }
    text
}

#[tokio::test]
async fn missing_executable_is_unavailable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, _rx) = mpsc::channel(16);
    let mut spawn = shell("true", temp.path());
    spawn.executable = "/definitely/not/an/agent".into();

    let err = supervisor(1, Duration::from_secs(1))
        .spawn("s-missing", spawn, tx)
        .expect_err("spawn must fail");

    assert!(matches!(err, AppError::ProcessUnavailable(_)));
}

#[tokio::test]
async fn exhausted_restarts_end_in_crashed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);

    let handle = supervisor(2, Duration::from_secs(30))
        .spawn("s-crash", shell("exit 3", temp.path()), tx)
        .expect("spawn");

    let mut attempts = Vec::new();
    let restarts = loop {
        match next_event(&mut rx).await {
            ProcessEvent::Restarting { attempt, reason, .. } => {
                assert!(reason.contains("code 3"), "reason: {reason}");
                attempts.push(attempt);
            }
            ProcessEvent::Crashed { restarts, .. } => break restarts,
            ProcessEvent::Output(_) | ProcessEvent::Ready => {}
        }
    };

    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(restarts, 2);
    assert_eq!(handle.status(), ProcessStatus::Crashed);
    assert_eq!(handle.restarts(), 2);
    assert!(matches!(handle.write("hello").await, Err(AppError::Process(_))));
}

#[tokio::test]
async fn relaunch_recovers_after_one_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);
    let script = "if [ -f ran ]; then echo READY; sleep 30; else touch ran; exit 4; fi";

    let handle = supervisor(3, Duration::from_secs(30))
        .spawn("s-recover", shell(script, temp.path()), tx)
        .expect("spawn");

    match next_event(&mut rx).await {
        ProcessEvent::Restarting { attempt, .. } => assert_eq!(attempt, 1),
        other => panic!("expected restart, got {other:?}"),
    }
    output_until(&mut rx, "READY").await;
    assert_eq!(handle.restarts(), 1);
    assert!(handle.pid().is_some());

    handle.stop().await;
    assert_eq!(handle.status(), ProcessStatus::Stopped);
}

#[tokio::test]
async fn readiness_timeout_promotes_starting_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);

    let handle = supervisor(1, Duration::from_millis(50))
        .spawn("s-ready", shell("cat", temp.path()), tx)
        .expect("spawn");
    assert!(matches!(handle.write("too early").await, Err(AppError::Process(_))));

    assert_eq!(next_event(&mut rx).await, ProcessEvent::Ready);
    assert_eq!(handle.status(), ProcessStatus::Ready);
    assert_eq!(handle.wait_ready().await, ProcessStatus::Ready);

    handle.stop().await;
}

#[tokio::test]
async fn idle_notification_readies_before_timeout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);

    let handle = supervisor(1, Duration::from_secs(30))
        .spawn("s-idle", shell("echo READY; cat", temp.path()), tx)
        .expect("spawn");

    output_until(&mut rx, "READY").await;
    assert_eq!(handle.status(), ProcessStatus::Starting);
    assert!(handle.notify_idle());
    assert!(!handle.notify_idle());
    assert_eq!(handle.status(), ProcessStatus::Ready);

    handle.mark_busy();
    assert_eq!(handle.status(), ProcessStatus::Busy);

    handle.stop().await;
}

#[tokio::test]
async fn commands_reach_agent_stdin_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);

    let handle = supervisor(1, Duration::from_millis(20))
        .spawn("s-echo", shell("cat", temp.path()), tx)
        .expect("spawn");
    assert_eq!(handle.wait_ready().await, ProcessStatus::Ready);

    handle.write("first").await.expect("write first");
    handle.write("second").await.expect("write second");

    let text = output_until(&mut rx, "second\n").await;
    assert_eq!(text, "first\nsecond\n");

    handle.stop().await;
}

#[tokio::test]
async fn agent_environment_is_isolated_and_tagged() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);
    let script = r#"echo "id=$AGENT_BRIDGE_SESSION_ID extra=$EXTRA cwd=$(pwd)"; sleep 30"#;

    let handle = supervisor(1, Duration::from_secs(30))
        .spawn("s-env", shell(script, temp.path()), tx)
        .expect("spawn");

    let text = output_until(&mut rx, "\n").await;
    let cwd = temp.path().canonicalize().expect("canonical");
    assert_eq!(
        text.trim_end(),
        format!("id=s-env extra=yes cwd={}", cwd.display())
    );

    handle.stop().await;
}

#[tokio::test]
async fn stop_does_not_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);

    let handle = supervisor(3, Duration::from_secs(30))
        .spawn("s-stop", shell("sleep 30", temp.path()), tx)
        .expect("spawn");

    handle.stop().await;
    handle.stop().await;

    assert_eq!(handle.status(), ProcessStatus::Stopped);
    assert_eq!(handle.restarts(), 0);
    assert!(handle.pid().is_none());
    let quiet = tokio::time::timeout(Duration::from_millis(200), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, ProcessEvent::Restarting { .. }) {
                return true;
            }
        }
        false
    })
    .await;
    assert!(!matches!(quiet, Ok(true)), "stopped agent was restarted");
    assert!(matches!(handle.write("x").await, Err(AppError::Process(_))));
}

#[tokio::test]
async fn exited_generation_output_does_not_leak_into_relaunch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, mut rx) = mpsc::channel(64);
    // The first generation exits while a background child keeps its stdout
    // open and writes to it later.
    let script = "if [ -f ran ]; then echo FRESH; sleep 30; \
                  else touch ran; (sleep 3; echo STALE) & exit 5; fi";

    let handle = supervisor(2, Duration::from_secs(30))
        .spawn("s-stale", shell(script, temp.path()), tx)
        .expect("spawn");

    output_until(&mut rx, "FRESH").await;
    assert_eq!(handle.restarts(), 1);

    let mut later = String::new();
    let _ = tokio::time::timeout(Duration::from_secs(4), async {
        while let Some(event) = rx.recv().await {
            if let ProcessEvent::Output(bytes) = event {
                later.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
    })
    .await;
    assert!(!later.contains("STALE"), "old stdout forwarded: {later:?}");

    handle.stop().await;
}
