//! Timer-driven maintenance: event retention, WAL checkpoint, snapshots
//!
//! Each job is a tokio task ticking on its own interval and doing its
//! blocking work on the blocking pool. A failing tick is logged and the loop
//! waits for the next one. All loops stop on one cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use vigil_bus::EventLog;
use vigil_memory::{MemoryResult, MemoryStore};

use crate::config::MaintenanceConfig;
use crate::error::RuntimeResult;

/// Delete events older than `days`. Returns the number removed.
pub fn sweep_retention(log: &EventLog, days: u32) -> RuntimeResult<usize> {
    let removed = log.retention(days)?;
    debug!(removed, retention_days = days, "Retention sweep complete");
    Ok(removed)
}

/// Checkpoint when the WAL has reached `threshold` entries.
pub fn checkpoint_if_needed(memory: &MemoryStore, threshold: usize) -> MemoryResult<Option<usize>> {
    if memory.wal().should_checkpoint(threshold) {
        memory.checkpoint().map(Some)
    } else {
        Ok(None)
    }
}

/// Checkpoint whenever the WAL holds anything.
fn checkpoint_pending(memory: &MemoryStore) -> MemoryResult<Option<usize>> {
    if memory.wal().is_empty() {
        Ok(None)
    } else {
        memory.checkpoint().map(Some)
    }
}

/// Handle on the running maintenance loops.
#[derive(Debug)]
pub struct Maintenance {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Maintenance {
    /// Spawn the retention, checkpoint and snapshot loops on `handle`.
    pub fn spawn(
        handle: &Handle,
        config: &MaintenanceConfig,
        snapshot_dir: PathBuf,
        log: Arc<EventLog>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let maintenance = Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        let retention_days = config.retention_days;
        maintenance.spawn_loop(handle, "retention", config.retention_interval, move || {
            sweep_retention(&log, retention_days).map(|_| ())
        });

        let checkpoint_memory = Arc::clone(&memory);
        maintenance.spawn_loop(handle, "checkpoint", config.checkpoint_interval, move || {
            checkpoint_pending(&checkpoint_memory)?;
            Ok(())
        });

        maintenance.spawn_loop(handle, "snapshot", config.snapshot_interval, move || {
            write_snapshot(&memory, &snapshot_dir).map(|_| ())
        });

        maintenance.tracker.close();
        maintenance
    }

    fn spawn_loop<F>(&self, handle: &Handle, task: &'static str, period: Duration, job: F)
    where
        F: Fn() -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let cancel = self.cancel.clone();

        self.tracker.spawn_on(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(task, ?period, "Maintenance loop started");

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let job = Arc::clone(&job);
                    match tokio::task::spawn_blocking(move || job()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(task, error = %e, "Maintenance tick failed"),
                        Err(e) => error!(task, error = %e, "Maintenance tick panicked"),
                    }
                }
                debug!(task, "Maintenance loop stopped");
            },
            handle,
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal every loop and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn write_snapshot(memory: &MemoryStore, dir: &Path) -> RuntimeResult<PathBuf> {
    Ok(memory.snapshot(dir)?)
}
