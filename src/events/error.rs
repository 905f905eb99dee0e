//! Event error types.

use std::path::PathBuf;

/// Errors that can occur while writing or reading the event log.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Failed to create the directory holding the log.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open the log for appending or reading.
    #[error("Failed to open event log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a record.
    #[error("Failed to write event log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize or parse a record.
    #[error("Event JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while building or running a classifier.
#[derive(thiserror::Error, Debug)]
pub enum ClassifierError {
    /// A pattern rule does not compile.
    #[error("Invalid pattern for {event_type}: {source}")]
    InvalidPattern {
        event_type: String,
        #[source]
        source: regex::Error,
    },

    /// The classifier panicked on a line.
    #[error("Classifier panicked: {0}")]
    Panicked(String),
}
