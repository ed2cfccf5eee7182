//! Error types for Concord.

use thiserror::Error;

/// Result type alias for Concord operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating decisions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Empty or invalid input, unknown enum value, unauthorized actor.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown node, decision or algorithm id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation not permitted in the decision's current status.
    #[error("Invalid state for decision {decision_id}: {message}")]
    State {
        decision_id: String,
        message: String,
    },

    /// Per-decision serialization was violated; the decision must be reloaded.
    #[error("Concurrent evaluation detected on decision {0}")]
    Concurrency(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a missing node.
    pub fn node_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "Node",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing decision.
    pub fn decision_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "Decision",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing consensus algorithm.
    pub fn algorithm_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "Algorithm",
            id: id.to_string(),
        }
    }

    /// Shorthand for a status violation.
    pub fn state(decision_id: &str, message: impl Into<String>) -> Self {
        Error::State {
            decision_id: decision_id.to_string(),
            message: message.into(),
        }
    }

    /// Whether the caller can correct its input and retry.
    ///
    /// Concurrency and internal errors indicate a defect in the engine
    /// itself and are never recoverable by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::NotFound { .. } | Error::State { .. } | Error::Config(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
