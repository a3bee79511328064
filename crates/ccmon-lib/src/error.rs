//! Error types for the cost monitor

use thiserror::Error;

/// Errors raised while loading or validating a scenario
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("decoding scenario: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("reading scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("scenario has no name")]
    MissingName,

    #[error("scenario has zero length duration")]
    ZeroDuration,

    #[error("scenario has no events")]
    NoEvents,

    #[error("duplicate workload name: {0}")]
    DuplicateWorkload(String),

    #[error("event references unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("invalid node selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid {field} quantity {value:?} for workload {workload}")]
    InvalidQuantity {
        workload: String,
        field: &'static str,
        value: String,
    },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("repeat interval must be non-zero")]
    ZeroRepeat,

    #[error("repeating events expand past {limit} events")]
    TooManyEvents { limit: usize },
}

/// Errors returned by the cluster API seams
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Optimistic-concurrency conflict on write; safe to retry
    #[error("conflict writing {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Other(String),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

/// Errors raised by telemetry sinks
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telemetry sink is closed")]
    Closed,
}
