//! Lifecycle tests: retries, exits, stop and input.

use runtime_supervisor::config::AdapterConfig;
use runtime_supervisor::supervisor::{Adapter, AdapterError, HealthLevel, LifecycleState};

use super::{script_config, wait_for, wait_for_output};

#[tokio::test]
async fn instant_crash_exhausts_retry_budget() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = AdapterConfig {
        max_retries: 2,
        ..script_config("instant-crash", dir.path(), "exit 1\n")
    };
    let adapter = Adapter::new(config).unwrap();

    let err = adapter.start().await.unwrap_err();
    match err {
        AdapterError::Startup { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected startup error, got {other:?}"),
    }

    let status = adapter.status();
    assert_eq!(status.state, LifecycleState::Failed);
    assert_eq!(status.retries, 2);
    assert_eq!(status.returncode, Some(1));
    assert!(!status.running);
    assert!(status.last_error.is_some());
    assert_eq!(status.health, HealthLevel::Fail);
    assert!(!adapter.health().ok);
}

#[tokio::test]
async fn recovers_after_early_crashes() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("attempts");
    let body = format!(
        "n=$(cat {c} 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > {c}\nif [ $n -le 2 ]; then exit 1; fi\nexec cat\n",
        c = counter.display()
    );
    let adapter = Adapter::new(script_config("flaky-start", dir.path(), &body)).unwrap();

    let status = adapter.start().await.unwrap();
    assert_eq!(status.state, LifecycleState::Running);
    assert_eq!(status.retries, 2);
    assert!(status.running);
    assert!(status.pid.is_some());
    assert_eq!(status.health, HealthLevel::Ok);
    assert!(adapter.health().ok);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");

    let status = adapter.stop().await;
    assert_eq!(status.state, LifecycleState::Stopped);
    assert!(!status.running);
    assert_eq!(status.pid, None);
}

#[tokio::test]
async fn start_while_running_is_a_no_op() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config("double-start", dir.path(), "exec cat\n")).unwrap();

    let first = adapter.start().await.unwrap();
    let second = adapter.start().await.unwrap();
    assert_eq!(first.pid, second.pid);
    assert_eq!(second.state, LifecycleState::Running);
    assert_eq!(first.last_transition_at, second.last_transition_at);

    adapter.stop().await;
}

#[tokio::test]
async fn send_when_stopped_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("spawned");
    let body = format!("touch {}\nexec cat\n", counter.display());
    let adapter = Adapter::new(script_config("send-stopped", dir.path(), &body)).unwrap();

    let err = adapter.send("hello").unwrap_err();
    assert!(matches!(
        err,
        AdapterError::NotRunning {
            state: LifecycleState::Stopped
        }
    ));
    assert_eq!(err.http_status(), 409);
    assert!(!counter.exists());
}

#[tokio::test]
async fn stop_when_stopped_is_a_no_op() {
    let adapter = Adapter::new(AdapterConfig::new("idle")).unwrap();
    let before = adapter.status();

    let after = adapter.stop().await;
    assert_eq!(after.state, LifecycleState::Stopped);
    assert_eq!(after.last_transition_at, before.last_transition_at);
    assert_eq!(after.returncode, None);

    let again = adapter.stop().await;
    assert_eq!(again, after);
}

#[tokio::test]
async fn unresolvable_command_leaves_adapter_stopped() {
    let config = AdapterConfig {
        command_candidates: vec!["nonexistent-bin-xyz".to_string()],
        ..AdapterConfig::new("missing")
    };
    let adapter = Adapter::new(config).unwrap();

    let err = adapter.start().await.unwrap_err();
    assert!(matches!(err, AdapterError::Configuration(_)));
    assert!(err.to_string().contains("nonexistent-bin-xyz"));

    let status = adapter.status();
    assert_eq!(status.state, LifecycleState::Stopped);
    assert!(status.resolved_command.is_empty());
}

#[tokio::test]
async fn clean_exit_moves_to_stopped() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config("clean-exit", dir.path(), "read line\nexit 0\n")).unwrap();

    adapter.start().await.unwrap();
    adapter.send("bye").unwrap();

    let status = wait_for(&adapter, |s| s.state == LifecycleState::Stopped).await;
    assert_eq!(status.returncode, Some(0));
    assert!(!status.running);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn crash_after_startup_moves_to_failed() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config("late-crash", dir.path(), "read line\nexit 7\n")).unwrap();

    adapter.start().await.unwrap();
    adapter.send("crash").unwrap();

    let status = wait_for(&adapter, |s| s.state == LifecycleState::Failed).await;
    assert_eq!(status.returncode, Some(7));
    assert!(status.last_error.unwrap().contains('7'));
    assert!(matches!(
        adapter.send("again"),
        Err(AdapterError::NotRunning {
            state: LifecycleState::Failed
        })
    ));

    // A failed adapter can be started again.
    let status = adapter.start().await.unwrap();
    assert_eq!(status.state, LifecycleState::Running);
    assert!(status.last_error.is_none());
    adapter.stop().await;
}

#[tokio::test]
async fn output_tail_is_bounded_and_idempotent() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config(
        "output-tail",
        dir.path(),
        "printf 'héllo wörld\\n'\nexec cat\n",
    ))
    .unwrap();

    adapter.start().await.unwrap();
    let full = wait_for_output(&adapter, "wörld").await;

    for n in [0, 1, 5, 10, 1000] {
        let tail = adapter.output(n);
        assert!(tail.chars().count() <= n);
        assert!(full.ends_with(&tail));
        assert_eq!(adapter.output(n), tail);
    }

    adapter.send("ping").unwrap();
    wait_for_output(&adapter, "ping").await;

    adapter.stop().await;
    assert!(adapter.output(usize::MAX).contains("ping"));
}

#[tokio::test]
async fn stop_escalates_when_runtime_ignores_sigterm() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = AdapterConfig {
        grace_period_ms: 200,
        ..script_config(
            "stubborn",
            dir.path(),
            "trap '' TERM\nwhile true; do sleep 1; done\n",
        )
    };
    let adapter = Adapter::new(config).unwrap();

    adapter.start().await.unwrap();
    let status = adapter.stop().await;
    assert_eq!(status.state, LifecycleState::Stopped);
    assert!(!status.running);
}

#[tokio::test]
async fn stop_discards_output_from_leftover_jobs() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config(
        "leftover-job",
        dir.path(),
        "( trap '' HUP TERM; sleep 1; echo STALE-AFTER-STOP ) &\nexec cat\n",
    ))
    .unwrap();
    let mut chunks = adapter.subscribe_output();

    adapter.start().await.unwrap();
    let status = adapter.stop().await;
    assert_eq!(status.state, LifecycleState::Stopped);
    while chunks.try_recv().is_ok() {}
    let before = adapter.output(usize::MAX);

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let after = adapter.output(usize::MAX);
    assert_eq!(after, before);
    assert!(!after.contains("STALE-AFTER-STOP"));
    while let Ok(chunk) = chunks.try_recv() {
        assert!(!chunk.contains("STALE-AFTER-STOP"));
    }
    assert_eq!(adapter.status().state, LifecycleState::Stopped);
}

#[tokio::test]
async fn exit_with_background_job_still_moves_to_stopped() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config(
        "orphaned-job",
        dir.path(),
        "( trap '' HUP TERM; sleep 30 ) &\nread line\nexit 0\n",
    ))
    .unwrap();

    adapter.start().await.unwrap();
    adapter.send("bye").unwrap();

    let status = wait_for(&adapter, |s| s.state == LifecycleState::Stopped).await;
    assert_eq!(status.returncode, Some(0));
    assert!(!status.running);
    assert_eq!(status.pid, None);
    assert!(status.last_error.is_none());

    // The adapter can be started again once the session is released.
    let status = adapter.start().await.unwrap();
    assert_eq!(status.state, LifecycleState::Running);
    adapter.stop().await;
}
