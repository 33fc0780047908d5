//! # Vigil
//!
//! Runtime composition root for an always-on agent: a durable event bus,
//! trigger-driven cycle scheduling and WAL-backed memory, started from one
//! [`VigilConfig`] and shut down as a unit.
//!
//! ```no_run
//! use vigil::{Runtime, VigilConfig};
//! use vigil_core::{EventType, NewEvent};
//! use vigil_cycle::{CycleKind, CycleOutcome, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VigilConfig::load(None)?;
//!     vigil::telemetry::init_tracing(config.telemetry.format);
//!
//!     let runtime = Runtime::builder(config)
//!         .handler(
//!             CycleKind::Reasoning,
//!             handler_fn(|req| Ok(CycleOutcome::default().with_suggestion(req.reason.clone()))),
//!         )
//!         .start()?;
//!
//!     runtime.publish(NewEvent::new(EventType::UserInput, "user").with_text("hello"))?;
//!     runtime.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod maintenance;
pub mod runtime;
pub mod shutdown;
pub mod telemetry;

pub use config::{ConfigError, VigilConfig, VigilConfigBuilder};
pub use context::RuntimeIdleContext;
pub use error::{RuntimeError, RuntimeResult};
pub use handler::{LoggingHandler, PersistingHandler, RUNTIME_SOURCE};
pub use maintenance::{Maintenance, checkpoint_if_needed, sweep_retention};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeShutdown};
pub use shutdown::shutdown_signal;
pub use telemetry::{LogFormat, init_tracing};
