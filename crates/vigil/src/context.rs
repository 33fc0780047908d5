//! Idle classification signals gathered from the live runtime

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use vigil_bus::{Subscriber, SubscriberError};
use vigil_core::{Event, EventType, SharedClock, elapsed_between};
use vigil_cycle::{DirectoryStaging, IdleContext, IdleSignals, StagingSource};
use vigil_memory::MemoryStore;

use crate::config::VigilConfig;

/// Feeds the idle trigger from the bus, the memory store and the staging area.
///
/// Subscribed to the bus so it sees negative emotions as they are published.
pub struct RuntimeIdleContext {
    clock: SharedClock,
    memory: Arc<MemoryStore>,
    staging: Option<DirectoryStaging>,
    goal_tag: String,
    emotion_type: EventType,
    meta_key: String,
    negative: BTreeSet<String>,
    recency: Duration,
    last_negative: Mutex<Option<DateTime<Utc>>>,
}

impl RuntimeIdleContext {
    pub fn new(config: &VigilConfig, clock: SharedClock, memory: Arc<MemoryStore>) -> Self {
        let emotion = &config.triggers.emotion;
        Self {
            clock,
            memory,
            staging: config.triggers.staging.dir.clone().map(DirectoryStaging::new),
            goal_tag: config.triggers.idle.goal_tag.clone(),
            emotion_type: EventType::parse(&emotion.event_type),
            meta_key: emotion.meta_key.clone(),
            negative: emotion.negative.iter().map(|s| s.to_lowercase()).collect(),
            recency: emotion.recency,
            last_negative: Mutex::new(None),
        }
    }

    /// Record a negative emotion seen at `at`.
    pub fn note_negative(&self, at: DateTime<Utc>) {
        let mut last = self.last_negative.lock().unwrap_or_else(|e| e.into_inner());
        if last.is_none_or(|prev| prev < at) {
            *last = Some(at);
        }
    }

    fn recent_negative(&self) -> bool {
        let last = *self.last_negative.lock().unwrap_or_else(|e| e.into_inner());
        last.is_some_and(|at| elapsed_between(at, self.clock.now()) <= self.recency)
    }

    fn staging_items(&self) -> usize {
        let Some(staging) = &self.staging else {
            return 0;
        };
        match staging.pending_items() {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Staging area unreadable, treating as empty");
                0
            }
        }
    }
}

impl IdleContext for RuntimeIdleContext {
    fn signals(&self) -> IdleSignals {
        IdleSignals {
            recent_negative_emotion: self.recent_negative(),
            open_goals: self.memory.count_tagged(&self.goal_tag),
            staging_items: self.staging_items(),
        }
    }
}

impl Subscriber for RuntimeIdleContext {
    fn name(&self) -> &str {
        "idle-context"
    }

    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        if !event.is(&self.emotion_type) {
            return Ok(());
        }
        let negative = event
            .meta_str(&self.meta_key)
            .is_some_and(|v| self.negative.contains(&v.trim().to_lowercase()));
        if negative {
            self.note_negative(event.timestamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{EventId, ManualClock, NewEvent};
    use vigil_memory::{MemoryConfig, MemoryItem};

    fn fixture(
        staging: Option<&std::path::Path>) -> (tempfile::TempDir, Arc<ManualClock>, RuntimeIdleContext,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let memory =
            Arc::new(MemoryStore::open(MemoryConfig::new(dir.path()), clock.clone()).unwrap());
        let mut config = VigilConfig::default();
        config.triggers.staging.dir = staging.map(|p| p.to_path_buf());
        let context = RuntimeIdleContext::new(&config, clock.clone(), memory);
        (dir, clock, context)
    }

    #[test]
    fn test_negative_emotion_expires_after_recency_window() {
        use vigil_core::Clock;
        let (_dir, clock, context) = fixture(None);
        let event = NewEvent::new(EventType::UserInput, "user")
            .with_meta("emotion", "Frustrated")
            .into_event(EventId::new(1), clock.now());
        context.on_event(&event).unwrap();
        assert!(context.signals().recent_negative_emotion);

        clock.advance(Duration::from_secs(31 * 60));
        assert!(!context.signals().recent_negative_emotion);
    }

    #[test]
    fn test_counts_goals_and_staging_items() {
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("note.md"), "x").unwrap();
        std::fs::write(staging.path().join("draft.tmp"), "x").unwrap();

        let (_dir, _clock, context) = fixture(Some(staging.path()));
        let now = chrono::Utc::now();
        context
            .memory
            .push_long_term(MemoryItem::new("ship v1", "user", now).with_tag("goal"))
            .unwrap();
        context
            .memory
            .push_long_term(MemoryItem::new("likes tea", "user", now))
            .unwrap();

        let signals = context.signals();
        assert_eq!(signals.open_goals, 1);
        assert_eq!(signals.staging_items, 1);
        assert!(!signals.recent_negative_emotion);
    }
}
