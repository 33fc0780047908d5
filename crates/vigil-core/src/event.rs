//! Event model
//!
//! An [`Event`] is written once by the event log and never mutated afterwards.
//! Producers build a [`NewEvent`] and leave id, timestamp and trace id to the log.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open key/value bag attached to every event.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Durable event identifier, assigned by the log and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates events that belong to the same logical interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Fresh random trace id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TraceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TraceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event type tag, stored as a snake_case string.
///
/// Unknown tags round-trip through [`EventType::Custom`] so producers can
/// introduce new types without touching this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    UserInput,
    DriverResponse,
    ProactiveMessage,
    ResourcePressure,
    StagingIngested,
    CycleStarted,
    CycleCompleted,
    CycleFailed,
    System,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::UserInput => "user_input",
            EventType::DriverResponse => "driver_response",
            EventType::ProactiveMessage => "proactive_message",
            EventType::ResourcePressure => "resource_pressure",
            EventType::StagingIngested => "staging_ingested",
            EventType::CycleStarted => "cycle_started",
            EventType::CycleCompleted => "cycle_completed",
            EventType::CycleFailed => "cycle_failed",
            EventType::System => "system",
            EventType::Custom(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "user_input" => EventType::UserInput,
            "driver_response" => EventType::DriverResponse,
            "proactive_message" => EventType::ProactiveMessage,
            "resource_pressure" => EventType::ResourcePressure,
            "staging_ingested" => EventType::StagingIngested,
            "cycle_started" => EventType::CycleStarted,
            "cycle_completed" => EventType::CycleCompleted,
            "cycle_failed" => EventType::CycleFailed,
            "system" => EventType::System,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::parse(&value)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        EventType::parse(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured event payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Text {
        text: String,
    },
    /// Resource pressure notification; `level` is a 0.0-1.0 utilisation ratio
    Pressure {
        resource: String,
        level: f64,
    },
    Cycle {
        kind: String,
        reason: String,
    },
    Json {
        value: serde_json::Value,
    },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            _ => None,
        }
    }

    /// First field holding a value JSON cannot represent, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        match self {
            Payload::Pressure { level, .. } if !level.is_finite() => Some("level"),
            _ => None,
        }
    }
}

/// Producer-side event draft.
///
/// Id, timestamp and trace id are filled in by the event log when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub source: String,
    pub payload: Payload,
    pub meta: Meta,
    pub trace_id: Option<TraceId>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<EventType>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload: Payload::Empty,
            meta: Meta::new(),
            trace_id: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_payload(Payload::text(text))
    }

    #[must_use]
    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<TraceId>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Pin the event timestamp instead of taking the log clock's "now".
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Materialise the draft once the log has assigned an id.
    pub fn into_event(self, id: EventId, now: DateTime<Utc>) -> Event {
        Event {
            id,
            trace_id: self.trace_id.unwrap_or_else(TraceId::generate),
            timestamp: self.timestamp.unwrap_or(now),
            event_type: self.event_type,
            source: self.source,
            payload: self.payload,
            meta: self.meta,
        }
    }
}

/// A fully populated, durably logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub trace_id: TraceId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub payload: Payload,
    #[serde(default)]
    pub meta: Meta,
}

impl Event {
    /// String-valued meta field, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(|value| value.as_str())
    }

    pub fn is(&self, event_type: &EventType) -> bool {
        &self.event_type == event_type
    }
}
