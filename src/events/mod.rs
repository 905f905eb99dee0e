//! Structured events classified from runtime output.

mod classifier;
mod error;
mod sink;
mod types;

pub use classifier::{
    classify_guarded, LineClassifier, NullClassifier, PatternClassifier, PatternRule,
};
pub use error::{ClassifierError, SinkError};
pub use sink::EventSink;
pub use types::{Classification, Event};
