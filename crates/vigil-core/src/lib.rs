//! # Vigil Core
//!
//! Shared building blocks for the Vigil coordination core:
//!
//! - **[event]**: the immutable [`Event`] record and the producer-side [`NewEvent`] draft
//! - **[clock]**: the [`Clock`] time source injected into every timer-driven component
//! - **[background]**: cooperatively cancellable sleep-between-checks loops
//! - **`sqlite`** (feature `sqlite`): connection tuning and schema migrations

pub mod background;
pub mod clock;
pub mod event;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use background::BackgroundLoop;
pub use clock::{
    Clock, ManualClock, SharedClock, SystemClock, add_duration, elapsed_between, system_clock,
};
pub use event::{Event, EventId, EventType, Meta, NewEvent, Payload, TraceId};
