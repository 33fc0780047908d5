//! Idle detection
//!
//! Relevant events record activity. A poll that finds the last activity
//! older than `timeout` classifies what a quiet period calls for and either
//! fires a reasoning cycle with that action or, after too many consecutive
//! fires, rests silently. Either way the idle clock restarts.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vigil_core::{BackgroundLoop, Event, EventType, SharedClock, elapsed_between};

use crate::cycle::{CycleKind, CycleRequester};
use crate::error::TriggerError;
use crate::trigger::Trigger;

#[derive(Debug, Clone)]
pub struct IdleConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_consecutive_fires: u32,
    /// Event types that count as activity
    pub activity_types: Vec<EventType>,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
            max_consecutive_fires: 3,
            activity_types: vec![EventType::UserInput],
        }
    }
}

/// What an idle period calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    Rest,
    CheckIn,
    ReviewGoals,
    DigestStaging,
    Reflect,
}

impl IdleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleAction::Rest => "rest",
            IdleAction::CheckIn => "check_in",
            IdleAction::ReviewGoals => "review_goals",
            IdleAction::DigestStaging => "digest_staging",
            IdleAction::Reflect => "reflect",
        }
    }

    /// `Rest` resets silently; every other action requests a cycle.
    pub fn fires(&self) -> bool {
        !matches!(self, IdleAction::Rest)
    }

    /// First matching row wins.
    pub fn classify(
        consecutive_fires: u32,
        max_consecutive_fires: u32,
        signals: &IdleSignals,
    ) -> Self {
        if consecutive_fires >= max_consecutive_fires {
            IdleAction::Rest
        } else if signals.recent_negative_emotion {
            IdleAction::CheckIn
        } else if signals.open_goals > 0 {
            IdleAction::ReviewGoals
        } else if signals.staging_items > 0 {
            IdleAction::DigestStaging
        } else {
            IdleAction::Reflect
        }
    }
}

impl fmt::Display for IdleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary state consulted when classifying an idle period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleSignals {
    pub recent_negative_emotion: bool,
    pub open_goals: usize,
    pub staging_items: usize,
}

/// Supplies [`IdleSignals`] at poll time.
pub trait IdleContext: Send + Sync {
    fn signals(&self) -> IdleSignals;
}

impl IdleContext for IdleSignals {
    fn signals(&self) -> IdleSignals {
        *self
    }
}

#[derive(Debug)]
struct IdleState {
    last_activity: DateTime<Utc>,
    consecutive_fires: u32,
}

struct IdleCore {
    config: IdleConfig,
    clock: SharedClock,
    context: Arc<dyn IdleContext>,
    requester: Arc<dyn CycleRequester>,
    state: Mutex<IdleState>,
}

impl IdleCore {
    fn state(&self) -> MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll(&self) -> Result<Option<IdleAction>, TriggerError> {
        let now = self.clock.now();
        let action = {
            let mut state = self.state();
            if elapsed_between(state.last_activity, now) < self.config.timeout {
                return Ok(None);
            }
            let action = IdleAction::classify(
                state.consecutive_fires,
                self.config.max_consecutive_fires,
                &self.context.signals(),
            );
            state.last_activity = now;
            if action.fires() {
                state.consecutive_fires += 1;
            }
            action
        };

        if action.fires() {
            debug!(trigger = "idle", action = %action, "Idle period detected");
            self.requester
                .request(CycleKind::Reasoning, &format!("idle:{action}"))?;
        } else {
            debug!(trigger = "idle", "Idle period absorbed, resting");
        }
        Ok(Some(action))
    }
}

/// Requests a reasoning cycle when no activity has been seen for a while.
pub struct IdleTrigger {
    core: Arc<IdleCore>,
    background: Option<BackgroundLoop>,
}

impl IdleTrigger {
    pub fn new(
        config: IdleConfig,
        clock: SharedClock,
        context: Arc<dyn IdleContext>,
        requester: Arc<dyn CycleRequester>,
    ) -> Result<Self, TriggerError> {
        if config.timeout.is_zero() || config.poll_interval.is_zero() {
            return Err(TriggerError::Misconfigured(
                "idle timeout and poll interval must be non-zero".into(),
            ));
        }
        let state = IdleState {
            last_activity: clock.now(),
            consecutive_fires: 0,
        };
        Ok(Self {
            core: Arc::new(IdleCore {
                config,
                clock,
                context,
                requester,
                state: Mutex::new(state),
            }),
            background: None,
        })
    }

    /// One evaluation. Returns the classified action if the timeout had
    /// elapsed, whether or not it fired.
    pub fn poll(&self) -> Result<Option<IdleAction>, TriggerError> {
        self.core.poll()
    }

    pub fn consecutive_fires(&self) -> u32 {
        self.core.state().consecutive_fires
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.core.state().last_activity
    }

    pub fn is_running(&self) -> bool {
        self.background.as_ref().is_some_and(BackgroundLoop::is_running)
    }
}

impl Trigger for IdleTrigger {
    fn name(&self) -> &str {
        "idle"
    }

    fn check(&mut self, event: &Event) -> Result<bool, TriggerError> {
        if self.core.config.activity_types.iter().any(|t| event.is(t)) {
            let now = self.core.clock.now();
            let mut state = self.core.state();
            state.last_activity = now;
            state.consecutive_fires = 0;
        }
        Ok(false)
    }

    fn reset(&mut self) {
        let now = self.core.clock.now();
        let mut state = self.core.state();
        state.last_activity = now;
        state.consecutive_fires = 0;
    }

    fn start(&mut self) -> Result<(), TriggerError> {
        if self.background.is_some() {
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        let background =
            BackgroundLoop::spawn("vigil-idle", core.config.poll_interval, move || {
                if let Err(e) = core.poll() {
                    warn!(trigger = "idle", error = %e, "Idle poll failed");
                }
            })?;
        self.background = Some(background);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut background) = self.background.take() {
            background.stop();
        }
    }
}

impl Drop for IdleTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::test_support::RecordingRequester;
    use vigil_core::{EventId, ManualClock, NewEvent};

    struct Fixture {
        clock: Arc<ManualClock>,
        requester: Arc<RecordingRequester>,
        trigger: IdleTrigger,
    }

    fn fixture(signals: IdleSignals, max_consecutive_fires: u32) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let requester = Arc::new(RecordingRequester::default());
        let config = IdleConfig {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_consecutive_fires,
            ..IdleConfig::default()
        };
        let trigger = IdleTrigger::new(
            config,
            clock.clone(),
            Arc::new(signals),
            requester.clone(),
        )
        .unwrap();
        Fixture {
            clock,
            requester,
            trigger,
        }
    }

    fn user_input(clock: &ManualClock) -> Event {
        use vigil_core::Clock;
        NewEvent::new(EventType::UserInput, "user").into_event(EventId::new(1), clock.now())
    }

    #[test]
    fn test_fires_once_after_timeout() {
        let f = fixture(IdleSignals::default(), 3);

        f.clock.advance(Duration::from_secs(59));
        assert_eq!(f.trigger.poll().unwrap(), None);

        f.clock.advance(Duration::from_secs(2));
        assert_eq!(f.trigger.poll().unwrap(), Some(IdleAction::Reflect));
        f.clock.advance(Duration::from_secs(5));
        assert_eq!(f.trigger.poll().unwrap(), None);

        assert_eq!(
            f.requester.taken(),
            vec![(CycleKind::Reasoning, "idle:reflect".to_string())]
        );
    }

    #[test]
    fn test_activity_before_poll_suppresses_fire() {
        let mut f = fixture(IdleSignals::default(), 3);
        f.clock.advance(Duration::from_secs(61));
        f.trigger.check(&user_input(&f.clock)).unwrap();

        assert_eq!(f.trigger.poll().unwrap(), None);
        assert_eq!(f.requester.len(), 0);
    }

    #[test]
    fn test_classification_follows_priority() {
        let signals = IdleSignals {
            recent_negative_emotion: true,
            open_goals: 2,
            staging_items: 4,
        };
        assert_eq!(IdleAction::classify(0, 3, &signals), IdleAction::CheckIn);
        assert_eq!(IdleAction::classify(3, 3, &signals), IdleAction::Rest);

        let goals = IdleSignals {
            recent_negative_emotion: false,
            ..signals
        };
        assert_eq!(IdleAction::classify(0, 3, &goals), IdleAction::ReviewGoals);

        let staging = IdleSignals {
            open_goals: 0,
            ..goals
        };
        assert_eq!(IdleAction::classify(0, 3, &staging), IdleAction::DigestStaging);
    }

    #[test]
    fn test_rests_after_max_consecutive_fires_until_activity() {
        let mut f = fixture(
            IdleSignals {
                staging_items: 1,
                ..IdleSignals::default()
            },
            2,
        );

        let actions: Vec<_> = (0..4)
            .map(|_| {
                f.clock.advance(Duration::from_secs(61));
                f.trigger.poll().unwrap()
            })
            .collect();
        assert_eq!(
            actions,
            vec![
                Some(IdleAction::DigestStaging),
                Some(IdleAction::DigestStaging),
                Some(IdleAction::Rest),
                Some(IdleAction::Rest),
            ]
        );
        assert_eq!(f.requester.len(), 2);

        f.trigger.check(&user_input(&f.clock)).unwrap();
        assert_eq!(f.trigger.consecutive_fires(), 0);
        f.clock.advance(Duration::from_secs(61));
        assert_eq!(f.trigger.poll().unwrap(), Some(IdleAction::DigestStaging));
    }

    #[test]
    fn test_irrelevant_events_do_not_count_as_activity() {
        let mut f = fixture(IdleSignals::default(), 3);
        f.clock.advance(Duration::from_secs(61));
        let system = NewEvent::new(EventType::System, "core")
            .into_event(EventId::new(2), chrono::Utc::now());
        f.trigger.check(&system).unwrap();
        assert_eq!(f.trigger.poll().unwrap(), Some(IdleAction::Reflect));
    }

    #[test]
    fn test_background_loop_starts_and_stops() {
        let mut f = fixture(IdleSignals::default(), 3);
        f.trigger.start().unwrap();
        assert!(f.trigger.is_running());
        f.trigger.start().unwrap();
        f.trigger.stop();
        assert!(!f.trigger.is_running());
    }
}
