//! Adapter lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Running, but the classifier keeps failing.
    Degraded,
    Stopping,
    /// Terminal until the next `start()`.
    Failed,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    /// States in which the runtime is up and accepts input.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }

    /// Whether `self -> next` is an allowed transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use LifecycleState::{Degraded, Failed, Running, Starting, Stopped, Stopping};

        if *self == next {
            return false;
        }
        matches!(
            (*self, next),
            (_, Failed)
                | (Stopped | Failed, Starting)
                | (Starting, Running | Stopping)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Running | Degraded, Stopping | Stopped)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse health verdict reported with every status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Ok,
    Warn,
    Fail,
}

impl HealthLevel {
    /// Health for a lifecycle state and the observed process liveness.
    #[must_use]
    pub fn assess(state: LifecycleState, alive: bool) -> Self {
        match state {
            LifecycleState::Running if alive => Self::Ok,
            LifecycleState::Running | LifecycleState::Degraded if !alive => Self::Fail,
            LifecycleState::Failed => Self::Fail,
            _ => Self::Warn,
        }
    }
}

/// Lifecycle state plus the bookkeeping reported in status snapshots.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    last_transition_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Stopped,
            last_transition_at: Utc::now(),
            last_error: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.last_transition_at
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Move to `next` if the transition is allowed.
    ///
    /// Returns false, leaving the state untouched, otherwise.
    pub fn transition(&mut self, next: LifecycleState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(from = %self.state, to = %next, "Ignoring invalid transition");
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.last_transition_at = Utc::now();
        true
    }

    /// Move to Failed, recording `error`.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.set_error(error);
        self.transition(LifecycleState::Failed);
    }
}
