//! Staging-area watch
//!
//! Polls an external staging location for unconsumed items. When it finds
//! some it requests a reasoning cycle and then stays quiet for `cooldown`
//! so the cycle has time to digest them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vigil_core::{BackgroundLoop, Event, SharedClock, add_duration};

use crate::cycle::{CycleKind, CycleRequester};
use crate::error::TriggerError;
use crate::trigger::Trigger;

/// Something that can report how many items wait to be ingested.
pub trait StagingSource: Send + Sync {
    fn describe(&self) -> String;

    fn pending_items(&self) -> Result<usize, TriggerError>;
}

/// Counts visible, non-temporary regular files directly inside a directory.
///
/// A missing directory holds nothing.
#[derive(Debug, Clone)]
pub struct DirectoryStaging {
    path: PathBuf,
}

impl DirectoryStaging {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_candidate(name: &str) -> bool {
        !name.starts_with('.') && !name.ends_with(".tmp") && !name.ends_with(".part")
    }
}

impl StagingSource for DirectoryStaging {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn pending_items(&self) -> Result<usize, TriggerError> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(TriggerError::SourceUnavailable {
                    source_name: self.describe(),
                    reason: e.to_string(),
                });
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && Self::is_candidate(&entry.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub poll_interval: Duration,
    /// Quiet period after a fire; should be at least `poll_interval`
    pub cooldown: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(600),
        }
    }
}

struct StagingCore {
    config: StagingConfig,
    source: Box<dyn StagingSource>,
    clock: SharedClock,
    requester: Arc<dyn CycleRequester>,
    quiet_until: Mutex<Option<DateTime<Utc>>>,
}

impl StagingCore {
    fn quiet_until(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.quiet_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll(&self) -> Result<bool, TriggerError> {
        let now = self.clock.now();
        if self.quiet_until().is_some_and(|until| now < until) {
            return Ok(false);
        }

        let items = self.source.pending_items()?;
        if items == 0 {
            return Ok(false);
        }

        *self.quiet_until() = Some(add_duration(now, self.config.cooldown));
        debug!(trigger = "staging", items, source = %self.source.describe(), "Unconsumed staging items");
        self.requester
            .request(CycleKind::Reasoning, &format!("staging:{items}"))?;
        Ok(true)
    }
}

/// Requests a reasoning cycle when the staging area has unconsumed items.
pub struct WatchedStagingTrigger {
    core: Arc<StagingCore>,
    background: Option<BackgroundLoop>,
}

impl WatchedStagingTrigger {
    pub fn new<S: StagingSource + 'static>(
        config: StagingConfig,
        source: S,
        clock: SharedClock,
        requester: Arc<dyn CycleRequester>,
    ) -> Result<Self, TriggerError> {
        if config.poll_interval.is_zero() {
            return Err(TriggerError::Misconfigured(
                "staging poll interval must be non-zero".into(),
            ));
        }
        Ok(Self {
            core: Arc::new(StagingCore {
                config,
                source: Box::new(source),
                clock,
                requester,
                quiet_until: Mutex::new(None),
            }),
            background: None,
        })
    }

    /// One evaluation; true if it fired.
    pub fn poll(&self) -> Result<bool, TriggerError> {
        self.core.poll()
    }

    pub fn pending_items(&self) -> Result<usize, TriggerError> {
        self.core.source.pending_items()
    }

    pub fn is_running(&self) -> bool {
        self.background.as_ref().is_some_and(BackgroundLoop::is_running)
    }
}

impl Trigger for WatchedStagingTrigger {
    fn name(&self) -> &str {
        "staging"
    }

    fn check(&mut self, _event: &Event) -> Result<bool, TriggerError> {
        Ok(false)
    }

    fn reset(&mut self) {
        *self.core.quiet_until() = None;
    }

    fn start(&mut self) -> Result<(), TriggerError> {
        if self.background.is_some() {
            return Ok(());
        }
        let core = Arc::clone(&self.core);
        let background =
            BackgroundLoop::spawn("vigil-staging", core.config.poll_interval, move || {
                if let Err(e) = core.poll() {
                    warn!(trigger = "staging", error = %e, "Staging poll failed");
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

impl Drop for WatchedStagingTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::test_support::RecordingRequester;
    use vigil_core::ManualClock;

    fn trigger(dir: &Path) -> (WatchedStagingTrigger, Arc<ManualClock>, Arc<RecordingRequester>) {
        let clock = Arc::new(ManualClock::starting_now());
        let requester = Arc::new(RecordingRequester::default());
        let config = StagingConfig {
            poll_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
        };
        let trigger = WatchedStagingTrigger::new(
            config,
            DirectoryStaging::new(dir),
            clock.clone(),
            requester.clone(),
        )
        .unwrap();
        (trigger, clock, requester)
    }

    #[test]
    fn test_directory_staging_skips_hidden_temp_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("note.md"), "hello").unwrap();
        fs::write(dir.path().join("paper.pdf"), "pdf").unwrap();
        fs::write(dir.path().join(".hidden"), "x").unwrap();
        fs::write(dir.path().join("upload.tmp"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let staging = DirectoryStaging::new(dir.path());
        assert_eq!(staging.pending_items().unwrap(), 2);
        assert_eq!(
            DirectoryStaging::new(dir.path().join("missing"))
                .pending_items()
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_fires_then_backs_off_for_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, clock, requester) = trigger(dir.path());

        assert!(!trigger.poll().unwrap());
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        assert!(trigger.poll().unwrap());

        clock.advance(Duration::from_secs(30));
        assert!(!trigger.poll().unwrap());
        clock.advance(Duration::from_secs(271));
        assert!(trigger.poll().unwrap());

        assert_eq!(
            requester.taken(),
            vec![
                (CycleKind::Reasoning, "staging:1".to_string()),
                (CycleKind::Reasoning, "staging:1".to_string()),
            ]
        );
    }

    #[test]
    fn test_reset_clears_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let (mut trigger, _clock, requester) = trigger(dir.path());

        assert!(trigger.poll().unwrap());
        trigger.reset();
        assert!(trigger.poll().unwrap());
        assert_eq!(requester.len(), 2);
    }
}
