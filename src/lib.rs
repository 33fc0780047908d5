//! Umbrella crate for the Vigil workspace.
//!
//! Re-exports every member crate so integration tests and downstream users
//! can depend on one package.

pub use vigil as runtime;
pub use vigil_bus as bus;
pub use vigil_core as model;
pub use vigil_cycle as cycle;
pub use vigil_memory as memory;

pub use vigil::{Runtime, RuntimeBuilder, VigilConfig};
pub use vigil_bus::{EventBus, EventLog, EventQuery};
pub use vigil_core::{Event, EventType, NewEvent, Payload};
pub use vigil_cycle::{CycleCoordinator, CycleKind, Trigger, TriggerSet};
pub use vigil_memory::{MemoryStore, WriteAheadLog};
