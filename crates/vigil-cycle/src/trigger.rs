//! Trigger contract

use vigil_core::Event;

use crate::error::TriggerError;

/// A stateful rule deciding, per event, whether a cycle should run.
///
/// `check` is called on the dispatch path in arrival order and returns whether
/// the trigger fired. Timer-driven triggers also poll on a background loop
/// started by `start` and joined by `stop`.
pub trait Trigger: Send {
    fn name(&self) -> &str;

    fn check(&mut self, event: &Event) -> Result<bool, TriggerError>;

    /// Return to zeroed state.
    fn reset(&mut self) {}

    fn start(&mut self) -> Result<(), TriggerError> {
        Ok(())
    }

    fn stop(&mut self) {}
}
