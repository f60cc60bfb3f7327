//! Error types for the environment cache and power controller.

use thiserror::Error;

/// Result type alias for power-toggle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by discovery, reconciliation and power control.
#[derive(Error, Debug)]
pub enum Error {
    /// A provider call failed. Aborts a refresh without touching the snapshot.
    #[error("provider call failed in {region}: {message}")]
    Adapter { region: String, message: String },

    /// A bulk stop was refused before any provider call was made.
    #[error(
        "SAFETY: environment {name} [{id}] has too many associated instances to stop ({count} > {limit})"
    )]
    SafetyLimitExceeded {
        id: String,
        name: String,
        count: usize,
        limit: usize,
    },

    /// Unknown environment or instance id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Desired state other than `start` or `stop`.
    #[error("invalid desired state: {0}")]
    InvalidState(String),

    /// No reference data for an instance type. Logged by the reconciler, never fatal.
    #[error("no instance type details for {instance_type} in {region}")]
    EnrichmentMiss {
        instance_type: String,
        region: String,
    },

    /// Some calls of a multi-call toggle failed; the others were not rolled back.
    #[error("{} of {attempted} provider call(s) failed: {}", .failures.len(), join_errors(.failures))]
    PartialFailure {
        attempted: usize,
        failures: Vec<Error>,
    },

    /// A webhook notification could not be delivered. Never fails a caller.
    #[error("notification failed: {0}")]
    Notify(String),

    /// Configuration missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an adapter error for the given region.
    pub fn adapter(region: impl Into<String>, message: impl ToString) -> Self {
        Self::Adapter {
            region: region.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn environment_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "environment",
            id: id.into(),
        }
    }

    pub fn instance_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "instance",
            id: id.into(),
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
