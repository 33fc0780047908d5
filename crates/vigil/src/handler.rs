//! Cycle handler decoration: lifecycle events and post-cycle persistence

use std::sync::{Arc, Weak};

use tracing::{error, info, warn};

use vigil_bus::EventBus;
use vigil_core::{EventType, NewEvent, Payload};
use vigil_cycle::{CycleError, CycleHandler, CycleOutcome, CycleReport, CycleRequest};
use vigil_memory::MemoryStore;

use crate::maintenance::checkpoint_if_needed;

/// Source tag on every event the runtime publishes itself.
pub const RUNTIME_SOURCE: &str = "vigil";

/// Wraps a host handler so every cycle announces itself on the bus and
/// leaves memory persisted when it ends, whatever the outcome.
pub struct PersistingHandler {
    inner: Arc<dyn CycleHandler>,
    memory: Arc<MemoryStore>,
    bus: Weak<EventBus>,
    checkpoint_threshold: usize,
}

impl PersistingHandler {
    pub fn new(
        inner: Arc<dyn CycleHandler>,
        memory: Arc<MemoryStore>,
        bus: Weak<EventBus>,
    ) -> Self {
        Self {
            inner,
            memory,
            bus,
            checkpoint_threshold: usize::MAX,
        }
    }

    /// Also checkpoint after a cycle once the WAL holds `threshold` entries.
    #[must_use]
    pub fn with_checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }
}

impl CycleHandler for PersistingHandler {
    fn run(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError> {
        publish(&self.bus, cycle_event(EventType::CycleStarted, request));

        let result = self.inner.run(request);

        if let Err(e) = self.memory.force_save_all() {
            error!(cycle.kind = %request.kind, error = %e, "Post-cycle memory save failed");
        } else if let Err(e) = checkpoint_if_needed(&self.memory, self.checkpoint_threshold) {
            error!(cycle.kind = %request.kind, error = %e, "Post-cycle checkpoint failed");
        }
        result
    }
}

/// Handler installed for kinds the host left unassigned; logs and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl CycleHandler for LoggingHandler {
    fn run(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError> {
        info!(
            cycle.kind = %request.kind,
            reason = %request.reason,
            "No handler registered for cycle kind, nothing to do"
        );
        Ok(CycleOutcome::default())
    }
}

/// Observer body: report cycle completion or failure on the bus.
pub(crate) fn announce_report(bus: &Weak<EventBus>, report: &CycleReport) {
    let duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX);
    match &report.result {
        Ok(outcome) => {
            let mut event = cycle_event(EventType::CycleCompleted, &report.request)
                .with_meta("duration_ms", duration_ms);
            if let Some(suggestion) = &outcome.suggestion {
                event = event.with_meta("suggestion", suggestion.as_str());
            }
            if let Some(delta) = &outcome.state_delta {
                event = event.with_meta("state_delta", delta.clone());
            }
            publish(bus, event);

            if let Some(instruction) = &outcome.proactive_instruction {
                publish(
                    bus,
                    NewEvent::new(EventType::ProactiveMessage, RUNTIME_SOURCE)
                        .with_text(instruction.as_str())
                        .with_meta("cycle_kind", report.request.kind.as_str()),
                );
            }
        }
        Err(e) => {
            publish(
                bus,
                cycle_event(EventType::CycleFailed, &report.request)
                    .with_meta("duration_ms", duration_ms)
                    .with_meta("error", e.to_string()),
            );
        }
    }
}

fn cycle_event(event_type: EventType, request: &CycleRequest) -> NewEvent {
    NewEvent::new(event_type, RUNTIME_SOURCE).with_payload(Payload::Cycle {
        kind: request.kind.to_string(),
        reason: request.reason.clone(),
    })
}

fn publish(bus: &Weak<EventBus>, event: NewEvent) {
    let Some(bus) = bus.upgrade() else {
        return;
    };
    if bus.is_closed() {
        return;
    }
    if let Err(e) = bus.publish(event) {
        warn!(error = %e, "Failed to publish cycle lifecycle event");
    }
}
