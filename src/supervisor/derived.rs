//! Adapter-local state derived from classified events.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::events::Classification;

/// Payload key carrying a depth reading.
pub const DEPTH_KEY: &str = "depth";

/// State computed by the supervisor from classifier output.
///
/// Classifiers never touch this; the supervisor feeds every classification
/// through [`observe`](Self::observe) and then [`enrich`](Self::enrich)es the
/// outgoing payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedState {
    /// Most recent depth reported by any event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,
    /// Deepest depth seen since the adapter was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<i64>,
    pub events_seen: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_type: Option<String>,
}

impl DerivedState {
    /// Fold one classification into the derived state.
    pub fn observe(&mut self, classification: &Classification) {
        self.events_seen = self.events_seen.saturating_add(1);
        self.last_event_type = Some(classification.event_type.clone());

        if let Some(depth) = classification.payload.get(DEPTH_KEY).and_then(depth_value) {
            self.depth = Some(depth);
            self.max_depth = Some(self.max_depth.map_or(depth, |max| max.max(depth)));
        }
    }

    /// Attach the current depth to a payload that does not carry one.
    pub fn enrich(&self, payload: &mut Map<String, Value>) {
        if let Some(depth) = self.depth {
            payload
                .entry(DEPTH_KEY)
                .or_insert_with(|| Value::from(depth));
        }
    }

    /// JSON map form used in status snapshots.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn depth_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
