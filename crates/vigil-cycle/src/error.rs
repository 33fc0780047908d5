//! Error types for triggers and cycle coordination

use thiserror::Error;

use crate::cycle::CycleKind;

/// Errors raised by the coordinator or returned by a cycle handler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    /// No handler is registered for the requested kind
    #[error("No cycle handler registered for '{0}'")]
    NoHandler(CycleKind),

    /// The coordinator is shutting down and rejects new requests
    #[error("Cycle coordinator is shut down")]
    ShuttingDown,

    /// A worker thread could not be spawned
    #[error("Failed to spawn cycle worker for '{kind}': {reason}")]
    SpawnFailed { kind: CycleKind, reason: String },

    /// The handler ran and reported failure
    #[error("Cycle failed: {0}")]
    HandlerFailed(String),

    /// The handler panicked; the worker caught it
    #[error("Cycle handler panicked: {0}")]
    Panicked(String),
}

impl CycleError {
    pub fn failed(message: impl Into<String>) -> Self {
        CycleError::HandlerFailed(message.into())
    }
}

/// Errors raised while evaluating or running a trigger
#[derive(Error, Debug)]
pub enum TriggerError {
    /// The trigger's configuration cannot work
    #[error("Trigger misconfigured: {0}")]
    Misconfigured(String),

    /// An external source the trigger watches could not be read
    #[error("Trigger source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// The trigger decided to fire but the coordinator refused the request
    #[error("Cycle request rejected: {0}")]
    RequestRejected(#[from] CycleError),

    /// The background poller could not be started
    #[error("Trigger background loop failed to start: {0}")]
    Io(#[from] std::io::Error),
}
