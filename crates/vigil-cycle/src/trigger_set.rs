//! A group of triggers observing the bus as one subscriber

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use vigil_bus::{Subscriber, SubscriberError};
use vigil_core::Event;

use crate::error::TriggerError;
use crate::trigger::Trigger;

/// Runs every trigger against each event, one at a time.
///
/// One failing or panicking trigger never stops the others.
#[derive(Default)]
pub struct TriggerSet {
    triggers: Mutex<Vec<Box<dyn Trigger>>>,
}

impl std::fmt::Debug for TriggerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerSet")
            .field("triggers", &self.names())
            .finish()
    }
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Trigger + 'static>(self, trigger: T) -> Self {
        self.add(trigger);
        self
    }

    pub fn add<T: Trigger + 'static>(&self, trigger: T) {
        self.guard().push(Box::new(trigger));
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Box<dyn Trigger>>> {
        self.triggers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn names(&self) -> Vec<String> {
        self.guard().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Check every trigger against `event`; returns the names that fired.
    pub fn evaluate(&self, event: &Event) -> Vec<String> {
        let mut fired = Vec::new();
        let mut triggers = self.guard();
        for trigger in triggers.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| trigger.check(event)));
            match outcome {
                Ok(Ok(true)) => {
                    debug!(trigger = trigger.name(), event.id = %event.id, "Trigger fired");
                    fired.push(trigger.name().to_string());
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    warn!(trigger = trigger.name(), event.id = %event.id, error = %e, "Trigger check failed");
                }
                Err(_) => {
                    warn!(trigger = trigger.name(), event.id = %event.id, "Trigger check panicked");
                }
            }
        }
        fired
    }

    /// Start every trigger's background loop; reports the first failure.
    pub fn start_all(&self) -> Result<(), TriggerError> {
        let mut first_error = None;
        for trigger in self.guard().iter_mut() {
            if let Err(e) = trigger.start() {
                warn!(trigger = trigger.name(), error = %e, "Trigger failed to start");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stop_all(&self) {
        for trigger in self.guard().iter_mut() {
            trigger.stop();
        }
    }

    pub fn reset_all(&self) {
        for trigger in self.guard().iter_mut() {
            trigger.reset();
        }
    }
}

impl Subscriber for TriggerSet {
    fn name(&self) -> &str {
        "trigger-set"
    }

    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        self.evaluate(event);
        Ok(())
    }
}
