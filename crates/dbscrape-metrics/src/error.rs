//! Error types for tag and registry operations.

use thiserror::Error;

/// Result type alias for registry operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors raised while building a tag set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("invalid tag key {0:?}: must be 1-255 printable ASCII characters")]
    InvalidKey(String),

    #[error("invalid value for tag {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },

    #[error("tag {0} inserted twice")]
    Duplicate(String),

    #[error("tag key {0} is not registered")]
    Unregistered(String),
}

/// Errors raised by the metrics registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("{kind} {name} is already registered with a different definition")]
    Conflict { kind: &'static str, name: String },

    #[error("invalid {kind} name {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("measure {0} is not registered")]
    UnknownMeasure(String),

    #[error("measure {measure} expects {expected} values")]
    KindMismatch {
        measure: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Tag(#[from] TagError),
}
