//! Supervisor facade tests against real processes on a PTY.

mod events_test;
mod lifecycle_test;

use std::path::Path;
use std::time::{Duration, Instant};

use runtime_supervisor::config::AdapterConfig;
use runtime_supervisor::supervisor::{Adapter, StatusSnapshot};

/// Config launching `body` with `/bin/sh` through a per-test override
/// variable, with short probe, backoff and grace periods.
pub fn script_config(id: &str, dir: &Path, body: &str) -> AdapterConfig {
    let script = dir.join(format!("{id}.sh"));
    std::fs::write(&script, body).unwrap();

    let var = format!(
        "RUNTIME_SUPERVISOR_TEST_{}",
        id.to_uppercase().replace('-', "_")
    );
    std::env::set_var(&var, format!("/bin/sh {}", script.display()));

    AdapterConfig {
        override_env: Some(var),
        max_retries: 3,
        backoff_ms: vec![10],
        probe_interval_ms: 200,
        grace_period_ms: 1000,
        ..AdapterConfig::new(id)
    }
}

/// Poll `status()` until `done` holds.
pub async fn wait_for(adapter: &Adapter, done: impl Fn(&StatusSnapshot) -> bool) -> StatusSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = adapter.status();
        if done(&status) {
            return status;
        }
        assert!(Instant::now() < deadline, "timed out waiting: {status:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `output()` until it contains `needle`.
pub async fn wait_for_output(adapter: &Adapter, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let output = adapter.output(usize::MAX);
        if output.contains(needle) {
            return output;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {needle:?} in {output:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
