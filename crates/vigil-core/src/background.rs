//! Cooperatively cancellable background loops
//!
//! Pollers (idle detection, staging area watch) run on dedicated threads that
//! sleep between ticks and check a running flag. Stopping never kills the
//! thread mid-tick; it waits for the current tick to return.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// Upper bound on how long `stop()` waits for a sleeping loop to notice.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// A named thread running `tick` every `interval` until stopped.
#[derive(Debug)]
pub struct BackgroundLoop {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundLoop {
    /// Spawn the loop. The first tick runs after one full interval.
    ///
    /// A panicking tick is logged and the loop carries on with the next one.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(task = %thread_name, ?interval, "Background loop started");
                while sleep_while_running(&flag, interval) {
                    if catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                        error!(task = %thread_name, "Background tick panicked, continuing");
                    }
                }
                debug!(task = %thread_name, "Background loop stopped");
            })?;

        Ok(Self {
            name,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    /// Clear the running flag and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(task = %self.name, "Background loop thread panicked");
            }
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `interval` in short slices; returns false as soon as the flag clears.
fn sleep_while_running(running: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
