//! Start attempts with bounded retries and backoff.
//!
//! Each attempt spawns the runtime, waits a short probe interval and checks
//! that it is still alive. A runtime that died in that window (or failed to
//! spawn at all) counts as a crash; crashes are retried after a delay taken
//! from the backoff schedule until the retry budget is spent.

use std::time::Duration;

/// Why a start attempt did not produce a live runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crash {
    /// Exit code, when the runtime was spawned and reaped.
    pub exit_code: Option<i32>,
    /// Human-readable detail recorded as the last error.
    pub detail: String,
}

impl Crash {
    #[must_use]
    pub fn exited(code: Option<i32>) -> Self {
        let detail = match code {
            Some(code) => format!("runtime exited with code {code} during startup"),
            None => "runtime exited during startup".to_string(),
        };
        Self {
            exit_code: code,
            detail,
        }
    }

    #[must_use]
    pub fn spawn_failed(detail: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            detail: detail.into(),
        }
    }
}

/// Something the retry controller can start and probe.
pub trait Launch {
    type Handle;

    /// Spawn one attempt. `attempt` counts from zero.
    ///
    /// # Errors
    ///
    /// Returns a `Crash` if the spawn itself failed.
    fn launch(&mut self, attempt: u32) -> Result<Self::Handle, Crash>;

    /// Check that a launched handle is still alive.
    ///
    /// # Errors
    ///
    /// Returns a `Crash` (with the reaped exit code) if it is not.
    fn probe(&mut self, handle: &Self::Handle) -> Result<(), Crash>;
}

/// Per-`start()` retry accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts_used: u32,
    max_retries: u32,
}

impl RetryBudget {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts_used: 0,
            max_retries,
        }
    }

    /// Failed attempts so far.
    #[must_use]
    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Count a failed attempt. Returns true when no retry is left.
    pub fn record_failure(&mut self) -> bool {
        self.attempts_used = self.attempts_used.saturating_add(1);
        self.attempts_used - 1 >= self.max_retries
    }
}

/// A runtime that passed the liveness probe.
#[derive(Debug)]
pub struct Started<H> {
    pub handle: H,
    /// Failed attempts before this one.
    pub retries: u32,
}

/// The retry budget ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    /// Spawn attempts made, always `max_retries + 1`.
    pub attempts: u32,
    /// The last attempt's crash.
    pub last: Crash,
}

/// Retry policy: budget, backoff schedule and probe interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub probe_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
            probe_interval: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempts_used`-th failure.
    ///
    /// The last schedule entry is reused once the schedule runs out; an empty
    /// schedule means no delay.
    #[must_use]
    pub fn backoff_for(&self, attempts_used: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(attempts_used.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff[index.min(last)]
    }

    /// Launch until an attempt survives the probe or the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns a `StartupFailure` once `max_retries + 1` attempts crashed.
    pub async fn start<L: Launch>(
        &self,
        launcher: &mut L,
    ) -> Result<Started<L::Handle>, StartupFailure> {
        let mut budget = RetryBudget::new(self.max_retries);

        loop {
            let attempt = budget.attempts_used();
            let outcome = match launcher.launch(attempt) {
                Ok(handle) => {
                    tokio::time::sleep(self.probe_interval).await;
                    launcher.probe(&handle).map(|()| handle)
                }
                Err(crash) => Err(crash),
            };

            let crash = match outcome {
                Ok(handle) => {
                    return Ok(Started {
                        handle,
                        retries: budget.attempts_used(),
                    })
                }
                Err(crash) => crash,
            };

            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = self.max_retries.saturating_add(1),
                exit_code = ?crash.exit_code,
                detail = %crash.detail,
                "Start attempt failed"
            );

            if budget.record_failure() {
                return Err(StartupFailure {
                    attempts: budget.attempts_used(),
                    last: crash,
                });
            }

            let delay = self.backoff_for(budget.attempts_used());
            tracing::debug!(delay_ms = delay.as_millis(), "Backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }
}
