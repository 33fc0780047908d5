//! Cycle vocabulary: kinds, requests, outcomes and the handler/requester seams

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CycleError;

/// Which kind of deferred background work a cycle performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CycleKind {
    Reasoning,
    Compression,
    Named(String),
}

impl CycleKind {
    pub fn as_str(&self) -> &str {
        match self {
            CycleKind::Reasoning => "reasoning",
            CycleKind::Compression => "compression",
            CycleKind::Named(name) => name,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "reasoning" => CycleKind::Reasoning,
            "compression" => CycleKind::Compression,
            other => CycleKind::Named(other.to_string()),
        }
    }
}

impl From<String> for CycleKind {
    fn from(tag: String) -> Self {
        CycleKind::parse(&tag)
    }
}

impl From<&str> for CycleKind {
    fn from(tag: &str) -> Self {
        CycleKind::parse(tag)
    }
}

impl From<CycleKind> for String {
    fn from(kind: CycleKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run one cycle, as seen by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRequest {
    pub kind: CycleKind,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// What a cycle produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    /// Suggestion text surfaced to the user, if any
    pub suggestion: Option<String>,
    /// Structured state change for the host to apply
    pub state_delta: Option<serde_json::Value>,
    /// Instruction for an unprompted message, if any
    pub proactive_instruction: Option<String>,
}

impl CycleOutcome {
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_state_delta(mut self, delta: serde_json::Value) -> Self {
        self.state_delta = Some(delta);
        self
    }

    pub fn with_proactive_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.proactive_instruction = Some(instruction.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.suggestion.is_none()
            && self.state_delta.is_none()
            && self.proactive_instruction.is_none()
    }
}

/// The body of a cycle. Opaque to the coordinator.
pub trait CycleHandler: Send + Sync + 'static {
    fn run(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError>;
}

/// Adapter turning a closure into a [`CycleHandler`].
pub struct FnHandler<F>(F);

impl<F> CycleHandler for FnHandler<F>
where
    F: Fn(&CycleRequest) -> Result<CycleOutcome, CycleError> + Send + Sync + 'static,
{
    fn run(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError> {
        (self.0)(request)
    }
}

/// Wrap a closure as a cycle handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&CycleRequest) -> Result<CycleOutcome, CycleError> + Send + Sync + 'static,
{
    FnHandler(f)
}

/// Whether a request started a worker or folded into one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Started,
    Coalesced,
}

/// What triggers hold to ask for a cycle.
pub trait CycleRequester: Send + Sync {
    fn request(&self, kind: CycleKind, reason: &str) -> Result<RequestStatus, CycleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in [
            CycleKind::Reasoning,
            CycleKind::Compression,
            CycleKind::Named("consolidate".into()),
        ] {
            assert_eq!(CycleKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&CycleKind::Compression).unwrap();
        assert_eq!(json, "\"compression\"");
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = CycleOutcome::default()
            .with_suggestion("take a break")
            .with_state_delta(serde_json::json!({"mood": "calm"}));
        assert!(!outcome.is_empty());
        assert!(outcome.proactive_instruction.is_none());
        assert!(CycleOutcome::default().is_empty());
    }
}
