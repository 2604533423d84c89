//! Error types used throughout the pipeline

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-field validation messages, keyed by field path (e.g. `".limit"`).
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Main error type for DocFlow.
///
/// Exactly five kinds, matching how each failure is handled:
/// validation and not-found are caller-visible; transient failures are
/// retried via the DLQ reprocessor; an open circuit dead-letters without
/// calling the classifier; integrity failures are terminal and end up parked.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Caller-supplied input failed validation. Surfaced at the HTTP boundary
    /// with per-field messages; never logged as an error.
    #[error("Validation failed")]
    Validation(FieldErrors),

    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Broker/network/database glitches and classifier non-2xx responses.
    /// Retryable across attempts via the reprocessor.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The classifier circuit breaker is open; the call failed fast without
    /// reaching the delegate.
    #[error("Classifier circuit open")]
    CircuitOpen,

    /// Malformed payload, unknown schema, constraint violation, or missing
    /// blob. Never retried.
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl PipelineError {
    /// Build a validation error for a single field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), vec![message.into()]);
        Self::Validation(fields)
    }

    /// Stable label suitable for metrics and structured logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::CircuitOpen => "circuit_open",
            Self::Integrity(_) => "integrity",
        }
    }
}

/// Result type alias for DocFlow operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_constructor_records_single_field() {
        let err = PipelineError::validation(".limit", "must be between 1 and 500");
        match err {
            PipelineError::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[".limit"], vec!["must be between 1 and 500".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(PipelineError::validation("f", "m").label(), "validation");
        assert_eq!(PipelineError::NotFound("doc".into()).label(), "not_found");
        assert_eq!(PipelineError::Transient("db".into()).label(), "transient");
        assert_eq!(PipelineError::CircuitOpen.label(), "circuit_open");
        assert_eq!(PipelineError::Integrity("blob".into()).label(), "integrity");
    }

    #[test]
    fn display_messages_are_user_facing() {
        assert_eq!(PipelineError::validation("f", "m").to_string(), "Validation failed");
        assert_eq!(PipelineError::CircuitOpen.to_string(), "Classifier circuit open");
    }
}
