//! Line classifiers.
//!
//! A classifier maps one output line to zero or more classifications. It must
//! be pure: no blocking, no I/O, no shared mutable state. Classifiers are
//! registered when an adapter is built and never see supervisor state.

use std::panic::{catch_unwind, AssertUnwindSafe};

use regex::Regex;
use serde_json::Value;

use super::{Classification, ClassifierError};

/// Strategy turning an output line into classifications.
pub trait LineClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Vec<Classification>;
}

impl<F> LineClassifier for F
where
    F: Fn(&str) -> Vec<Classification> + Send + Sync,
{
    fn classify(&self, line: &str) -> Vec<Classification> {
        self(line)
    }
}

/// Classifier that never emits anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

impl LineClassifier for NullClassifier {
    fn classify(&self, _line: &str) -> Vec<Classification> {
        Vec::new()
    }
}

/// Run a classifier, converting a panic into an error.
///
/// # Errors
///
/// Returns `ClassifierError::Panicked` with the panic message if the
/// classifier panicked.
pub fn classify_guarded(
    classifier: &dyn LineClassifier,
    line: &str,
) -> Result<Vec<Classification>, ClassifierError> {
    catch_unwind(AssertUnwindSafe(|| classifier.classify(line))).map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        ClassifierError::Panicked(message)
    })
}

/// A regex and the event type it produces.
#[derive(Debug, Clone)]
pub struct PatternRule {
    regex: Regex,
    event_type: String,
}

impl PatternRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidPattern` if `pattern` does not compile.
    pub fn new(pattern: &str, event_type: impl Into<String>) -> Result<Self, ClassifierError> {
        let event_type = event_type.into();
        let regex = Regex::new(pattern).map_err(|source| ClassifierError::InvalidPattern {
            event_type: event_type.clone(),
            source,
        })?;
        Ok(Self { regex, event_type })
    }

    fn apply(&self, line: &str) -> Option<Classification> {
        let captures = self.regex.captures(line)?;
        let mut classification = Classification::new(self.event_type.clone());
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                classification
                    .payload
                    .insert(name.to_string(), capture_value(m.as_str()));
            }
        }
        Some(classification)
    }
}

/// Table-driven classifier: every matching rule emits one classification.
///
/// Named capture groups become payload fields; integer captures are stored
/// as JSON numbers.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    rules: Vec<PatternRule>,
}

impl PatternClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidPattern` if `pattern` does not compile.
    pub fn rule(
        mut self,
        pattern: &str,
        event_type: impl Into<String>,
    ) -> Result<Self, ClassifierError> {
        self.rules.push(PatternRule::new(pattern, event_type)?);
        Ok(self)
    }

    #[must_use]
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }
}

impl LineClassifier for PatternClassifier {
    fn classify(&self, line: &str) -> Vec<Classification> {
        self.rules.iter().filter_map(|rule| rule.apply(line)).collect()
    }
}

fn capture_value(text: &str) -> Value {
    text.parse::<i64>()
        .map_or_else(|_| Value::String(text.to_string()), Value::from)
}
