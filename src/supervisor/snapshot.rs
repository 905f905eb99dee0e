//! Serializable status and health snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{HealthLevel, LifecycleState};

/// Point-in-time view of an adapter, as returned by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub adapter_id: String,
    pub state: LifecycleState,
    /// Active state and a live process.
    pub running: bool,
    pub pid: Option<u32>,
    /// Failed attempts consumed by the last `start()`.
    pub retries: u32,
    pub returncode: Option<i32>,
    pub resolved_command: Vec<String>,
    pub last_error: Option<String>,
    pub last_transition_at: DateTime<Utc>,
    pub health: HealthLevel,
    pub derived_state: Map<String, Value>,
}

/// Status plus a single health bit, as returned by `health()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Running and the process is alive.
    pub ok: bool,
    #[serde(flatten)]
    pub status: StatusSnapshot,
}

impl HealthSnapshot {
    #[must_use]
    pub fn from_status(status: StatusSnapshot) -> Self {
        Self {
            ok: status.state == LifecycleState::Running && status.running,
            status,
        }
    }
}
