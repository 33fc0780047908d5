//! # Vigil Bus
//!
//! Durable event log and in-process pub/sub for the Vigil coordination core.
//!
//! - **[EventLog]**: append-only SQLite store; the single serialization point for
//!   every producer
//! - **[EventBus]**: appends synchronously, then fans events out to subscribers on
//!   a bounded worker pool, off the publisher's thread
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_bus::{EventBus, EventBusConfig, EventLog, EventLogConfig, from_fn};
//! use vigil_core::{EventType, NewEvent, system_clock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(EventLog::open("events.db", EventLogConfig::default(), system_clock())?);
//!     let bus = EventBus::new(log, EventBusConfig::default())?;
//!
//!     bus.subscribe(from_fn("printer", |event| {
//!         println!("{} {}", event.id, event.event_type);
//!         Ok(())
//!     }));
//!
//!     let event = bus.publish(NewEvent::new(EventType::UserInput, "cli").with_text("hi"))?;
//!     println!("logged as {}", event.id);
//!
//!     bus.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod error;
pub mod log;
pub mod subscriber;

pub use bus::{BusStats, EventBus, EventBusConfig, ShutdownReport, SubscriptionId};
pub use error::{BusError, BusResult, SubscriberError};
pub use log::{EventLog, EventLogConfig, EventQuery};
pub use subscriber::{FnSubscriber, Subscriber, from_fn};
