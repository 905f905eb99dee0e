//! Adapter error types.

use crate::pty::PtyError;

use super::LifecycleState;

/// Errors surfaced by the adapter's control operations.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    /// No runtime could be resolved, or the adapter is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The OS refused to start the reader for a spawned runtime.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Every start attempt crashed.
    #[error("Runtime failed to start after {attempts} attempt(s): {last_error}")]
    Startup { attempts: u32, last_error: String },

    /// The operation needs a running runtime.
    #[error("Runtime is not running (state: {state})")]
    NotRunning { state: LifecycleState },

    /// Reading from or writing to the PTY failed.
    #[error("PTY I/O error: {0}")]
    Io(String),
}

impl AdapterError {
    /// HTTP status a control layer should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Configuration(_) | Self::Spawn(_) | Self::Io(_) => 500,
            Self::Startup { .. } => 503,
            Self::NotRunning { .. } => 409,
        }
    }
}

impl From<PtyError> for AdapterError {
    fn from(err: PtyError) -> Self {
        match &err {
            _ if err.is_configuration() => Self::Configuration(err.to_string()),
            PtyError::Open(_) | PtyError::Spawn { .. } => Self::Spawn(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}
