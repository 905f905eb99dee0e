//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::output::{DEFAULT_BUFFER_CHUNKS, DEFAULT_MAX_LINE_LEN};

/// A regex rule for the built-in pattern classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Regular expression; named groups become payload fields.
    pub regex: String,
    /// Event type emitted on match.
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Configuration for one supervised runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Adapter identifier, unique within a namespace.
    pub id: String,
    /// Namespace prefix of the event source.
    pub namespace: String,
    /// Environment variable holding a literal command line override.
    pub override_env: Option<String>,
    /// Binary names tried in order on `PATH`.
    pub command_candidates: Vec<String>,
    /// Working directory of the runtime; defaults to the current directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment for the runtime.
    pub env: BTreeMap<String, String>,
    /// Restarts allowed after the first failed attempt.
    pub max_retries: u32,
    /// Waits between failed attempts; the last entry is reused.
    pub backoff_ms: Vec<u64>,
    /// Delay between spawn and the liveness probe.
    ///
    /// A runtime that crashes later than this is seen as healthy; the probe
    /// is a race window, not an instantaneous check.
    pub probe_interval_ms: u64,
    /// How long `stop()` waits after SIGTERM before killing.
    pub grace_period_ms: u64,
    /// Output chunks retained for tail snapshots.
    pub buffer_chunks: usize,
    /// Longest unterminated line, in bytes, before it is emitted in pieces.
    pub max_line_len: usize,
    /// Consecutive classifier failures that mark a running adapter degraded.
    pub degraded_after: u32,
    /// JSON-lines event log; no log is written when unset.
    pub event_log: Option<PathBuf>,
    /// Rules for the built-in pattern classifier.
    pub patterns: Vec<PatternConfig>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            namespace: "runtime".to_string(),
            override_env: None,
            command_candidates: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            max_retries: 3,
            backoff_ms: vec![500, 1000, 2000],
            probe_interval_ms: 300,
            grace_period_ms: 3000,
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            degraded_after: 5,
            event_log: None,
            patterns: Vec::new(),
        }
    }
}

impl AdapterConfig {
    /// Create a config with defaults for the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// `<namespace>:<id>`, the source of every event this adapter records.
    #[must_use]
    pub fn source(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }

    #[must_use]
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Top-level configuration file: a list of adapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorFileConfig {
    pub adapters: Vec<AdapterConfig>,
}

impl SupervisorFileConfig {
    /// Find an adapter by id, or the first one when `id` is `None`.
    #[must_use]
    pub fn adapter(&self, id: Option<&str>) -> Option<&AdapterConfig> {
        match id {
            Some(id) => self.adapters.iter().find(|a| a.id == id),
            None => self.adapters.first(),
        }
    }
}
