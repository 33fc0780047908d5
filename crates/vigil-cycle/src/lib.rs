//! # Vigil Cycle
//!
//! Decides when deferred background work runs and makes sure it never runs twice
//! at once:
//!
//! - **[Trigger]**: rule objects checked against every bus event
//! - **[triggers]**: count, emotion, idle, resource-pressure and staging-area kinds
//! - **[TriggerSet]**: a bus subscriber evaluating a group of triggers in order
//! - **[CycleCoordinator]**: single-flight execution per [`CycleKind`] with
//!   pending-request coalescing
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use vigil_core::system_clock;
//! use vigil_cycle::{CycleCoordinator, CycleKind, CycleOutcome, handler_fn};
//!
//! let coordinator = CycleCoordinator::new(system_clock());
//! coordinator.register(
//!     CycleKind::Reasoning,
//!     handler_fn(|request| {
//!         Ok(CycleOutcome::default().with_suggestion(format!("ran for {}", request.reason)))
//!     }),
//! );
//!
//! coordinator.request(CycleKind::Reasoning, "count:5").unwrap();
//! assert!(coordinator.wait_idle(Duration::from_secs(5)));
//! ```

pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod trigger;
pub mod trigger_set;
pub mod triggers;

pub use coordinator::{CycleCoordinator, CycleReport, CycleState, CycleStats};
pub use cycle::{
    CycleHandler, CycleKind, CycleOutcome, CycleRequest, CycleRequester, FnHandler,
    RequestStatus, handler_fn,
};
pub use error::{CycleError, TriggerError};
pub use trigger::Trigger;
pub use trigger_set::TriggerSet;
pub use triggers::{
    CountConfig, CountTrigger, DirectoryStaging, EmotionConfig, EmotionTrigger, IdleAction,
    IdleConfig, IdleContext, IdleSignals, IdleTrigger, PressureConfig, ResourcePressureTrigger,
    StagingConfig, StagingSource, WatchedStagingTrigger,
};
