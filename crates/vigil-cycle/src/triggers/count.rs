//! Fires every N events of one type

use std::sync::Arc;

use vigil_core::{Event, EventType};

use crate::cycle::{CycleKind, CycleRequester};
use crate::error::TriggerError;
use crate::trigger::Trigger;

#[derive(Debug, Clone)]
pub struct CountConfig {
    pub event_type: EventType,
    pub threshold: u32,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            event_type: EventType::DriverResponse,
            threshold: 5,
        }
    }
}

/// Counts matching events and requests a reasoning cycle at the threshold.
pub struct CountTrigger {
    config: CountConfig,
    count: u32,
    requester: Arc<dyn CycleRequester>,
}

impl CountTrigger {
    pub fn new(
        config: CountConfig,
        requester: Arc<dyn CycleRequester>,
    ) -> Result<Self, TriggerError> {
        if config.threshold == 0 {
            return Err(TriggerError::Misconfigured(
                "count threshold must be at least 1".into(),
            ));
        }
        Ok(Self {
            config,
            count: 0,
            requester,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Trigger for CountTrigger {
    fn name(&self) -> &str {
        "count"
    }

    fn check(&mut self, event: &Event) -> Result<bool, TriggerError> {
        if !event.is(&self.config.event_type) {
            return Ok(false);
        }
        self.count += 1;
        if self.count < self.config.threshold {
            return Ok(false);
        }

        self.count = 0;
        self.requester.request(
            CycleKind::Reasoning,
            &format!("count:{}", self.config.threshold),
        )?;
        Ok(true)
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}
