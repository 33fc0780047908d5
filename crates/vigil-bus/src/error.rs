//! Error types for the event log and bus

use thiserror::Error;

/// Result type for event log and bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur while logging or publishing events
#[derive(Error, Debug)]
pub enum BusError {
    /// The durable store could not be reached; the event was not recorded
    #[error("Event storage unavailable during {operation}: {reason}")]
    StorageUnavailable {
        operation: &'static str,
        reason: String,
    },

    /// A read against the log failed
    #[error("Event query failed: {0}")]
    QueryFailed(String),

    /// Payload or meta could not be encoded
    #[error("Event serialization failed: {0}")]
    SerializationFailed(String),

    /// The event carries a value the log cannot store faithfully
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The bus has been shut down and no longer accepts events
    #[error("Event bus is shut down")]
    Closed,

    /// No tokio runtime was available to run deliveries
    #[error("Event bus runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

impl BusError {
    pub(crate) fn unavailable(operation: &'static str, err: impl std::fmt::Display) -> Self {
        BusError::StorageUnavailable {
            operation,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::SerializationFailed(err.to_string())
    }
}

/// A subscriber callback reported failure. Logged by the bus, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for SubscriberError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for SubscriberError {
    fn from(message: String) -> Self {
        Self(message)
    }
}
