//! Requests a compression cycle on resource pressure

use std::sync::Arc;

use vigil_core::{Event, EventType, Payload};

use crate::cycle::{CycleKind, CycleRequester};
use crate::error::TriggerError;
use crate::trigger::Trigger;

#[derive(Debug, Clone, Default)]
pub struct PressureConfig {
    /// Only fire at or above this level; `None` fires on every pressure event
    pub min_level: Option<f64>,
}

pub struct ResourcePressureTrigger {
    config: PressureConfig,
    requester: Arc<dyn CycleRequester>,
}

impl ResourcePressureTrigger {
    pub fn new(config: PressureConfig, requester: Arc<dyn CycleRequester>) -> Self {
        Self { config, requester }
    }
}

impl Trigger for ResourcePressureTrigger {
    fn name(&self) -> &str {
        "resource_pressure"
    }

    fn check(&mut self, event: &Event) -> Result<bool, TriggerError> {
        if !event.is(&EventType::ResourcePressure) {
            return Ok(false);
        }

        let (resource, level) = match &event.payload {
            Payload::Pressure { resource, level } => (resource.as_str(), Some(*level)),
            _ => ("unknown", None),
        };
        if let Some(min) = self.config.min_level {
            // An event without a level cannot satisfy a minimum.
            if level.is_none_or(|level| level < min) {
                return Ok(false);
            }
        }

        self.requester
            .request(CycleKind::Compression, &format!("pressure:{resource}"))?;
        Ok(true)
    }
}
