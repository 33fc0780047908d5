//! Fires when an event's emotion tag is in the negative set

use std::collections::BTreeSet;
use std::sync::Arc;

use vigil_core::{Event, EventType};

use crate::cycle::{CycleKind, CycleRequester};
use crate::error::TriggerError;
use crate::trigger::Trigger;

#[derive(Debug, Clone)]
pub struct EmotionConfig {
    pub event_type: EventType,
    pub meta_key: String,
    /// Compared case-insensitively
    pub negative: BTreeSet<String>,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            event_type: EventType::UserInput,
            meta_key: "emotion".to_string(),
            negative: ["angry", "anxious", "frustrated", "sad", "stressed", "upset"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Stateless: every matching event is classified on its own.
pub struct EmotionTrigger {
    event_type: EventType,
    meta_key: String,
    negative: BTreeSet<String>,
    requester: Arc<dyn CycleRequester>,
}

impl EmotionTrigger {
    pub fn new(config: EmotionConfig, requester: Arc<dyn CycleRequester>) -> Self {
        Self {
            event_type: config.event_type,
            meta_key: config.meta_key,
            negative: config.negative.iter().map(|s| s.to_lowercase()).collect(),
            requester,
        }
    }

    /// Whether `value` counts as a negative emotion.
    pub fn is_negative(&self, value: &str) -> bool {
        self.negative.contains(&value.trim().to_lowercase())
    }
}

impl Trigger for EmotionTrigger {
    fn name(&self) -> &str {
        "emotion"
    }

    fn check(&mut self, event: &Event) -> Result<bool, TriggerError> {
        if !event.is(&self.event_type) {
            return Ok(false);
        }
        let Some(value) = event.meta_str(&self.meta_key) else {
            return Ok(false);
        };
        if !self.is_negative(value) {
            return Ok(false);
        }

        self.requester.request(
            CycleKind::Reasoning,
            &format!("emotion:{}", value.trim().to_lowercase()),
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::test_support::RecordingRequester;
    use chrono::Utc;
    use vigil_core::{EventId, NewEvent};

    fn with_emotion(event_type: EventType, emotion: &str) -> Event {
        NewEvent::new(event_type, "test")
            .with_meta("emotion", emotion)
            .into_event(EventId::new(1), Utc::now())
    }

    #[test]
    fn test_negative_emotion_fires_case_insensitively() {
        let requester = Arc::new(RecordingRequester::default());
        let mut trigger = EmotionTrigger::new(EmotionConfig::default(), requester.clone());

        assert!(trigger.check(&with_emotion(EventType::UserInput, "Frustrated")).unwrap());
        assert!(!trigger.check(&with_emotion(EventType::UserInput, "happy")).unwrap());
        assert_eq!(
            requester.taken(),
            vec![(CycleKind::Reasoning, "emotion:frustrated".to_string())]
        );
    }

    #[test]
    fn test_other_types_and_missing_meta_are_ignored() {
        let requester = Arc::new(RecordingRequester::default());
        let mut trigger = EmotionTrigger::new(EmotionConfig::default(), requester.clone());

        assert!(!trigger.check(&with_emotion(EventType::DriverResponse, "angry")).unwrap());
        let bare =
            NewEvent::new(EventType::UserInput, "test").into_event(EventId::new(2), Utc::now());
        assert!(!trigger.check(&bare).unwrap());
        assert_eq!(requester.len(), 0);
    }

    #[test]
    fn test_custom_negative_set_is_normalised() {
        let config = EmotionConfig {
            negative: ["GRUMPY".to_string()].into_iter().collect(),
            ..EmotionConfig::default()
        };
        let trigger = EmotionTrigger::new(config, Arc::new(RecordingRequester::default()));
        assert!(trigger.is_negative("grumpy"));
        assert!(!trigger.is_negative("angry"));
    }
}
