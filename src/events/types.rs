//! Event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One classifier verdict for a line: an event type and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub event_type: String,
    pub payload: Map<String, Value>,
}

impl Classification {
    /// Create a classification with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// A recorded event, as written to the event log.
///
/// Serializes to `{"ts", "source", "type", "payload"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was recorded (UTC).
    pub ts: DateTime<Utc>,
    /// `<namespace>:<adapter_id>` of the producing adapter.
    pub source: String,
    /// Event type chosen by the classifier.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Classifier payload plus supervisor enrichment.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Stamp a classification with the current time and its source.
    #[must_use]
    pub fn new(source: impl Into<String>, classification: Classification) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            event_type: classification.event_type,
            payload: classification.payload,
        }
    }
}
