//! In-process event bus
//!
//! `publish` appends to the [`EventLog`] on the caller's thread, so the id is
//! known before it returns, then hands delivery to a bounded pool: one tokio
//! task per (event, subscriber), gated by a semaphore of `pool_width` permits,
//! with the callback itself on the blocking pool. Delivery order across
//! subscribers is best-effort; strict order is re-derived from the log by id.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use vigil_core::{Event, NewEvent};

use crate::error::{BusError, BusResult, SubscriberError};
use crate::log::EventLog;
use crate::subscriber::{FnSubscriber, Subscriber, from_fn};

/// Bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Maximum number of callbacks running at once
    pub pool_width: usize,
    /// How long `shutdown` waits for in-flight deliveries before cancelling
    pub shutdown_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            pool_width: 10,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub failed_deliveries: u64,
}

/// Result of [`EventBus::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All in-flight deliveries finished before the timeout
    pub drained: bool,
    /// Deliveries still outstanding when the bus gave up waiting
    pub abandoned: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Registration {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

/// Pub/sub over the durable event log.
pub struct EventBus {
    log: Arc<EventLog>,
    config: EventBusConfig,
    subscribers: RwLock<Vec<Registration>>,
    next_subscription: AtomicU64,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    closed: AtomicBool,
    runtime: Handle,
    counters: Arc<Counters>,
}

impl EventBus {
    /// Create a bus delivering on the current tokio runtime.
    pub fn new(log: Arc<EventLog>, config: EventBusConfig) -> BusResult<Self> {
        let runtime =
            Handle::try_current().map_err(|e| BusError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self::with_handle(log, config, runtime))
    }

    /// Create a bus delivering on an explicit runtime handle.
    pub fn with_handle(log: Arc<EventLog>, config: EventBusConfig, runtime: Handle) -> Self {
        let width = config.pool_width.max(1);
        Self {
            log,
            config,
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            permits: Arc::new(Semaphore::new(width)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            runtime,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Append the event durably, then schedule delivery to every subscriber.
    ///
    /// Fails with [`BusError::StorageUnavailable`] if the log cannot record it,
    /// and with [`BusError::Closed`] after shutdown. Never waits on subscribers.
    pub fn publish(&self, event: NewEvent) -> BusResult<Event> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let event = self.log.append(event)?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.dispatch(&event);
        Ok(event)
    }

    /// Register a subscriber; it sees every event published from now on.
    pub fn subscribe<S: Subscriber>(&self, subscriber: S) -> SubscriptionId {
        self.subscribe_shared(Arc::new(subscriber))
    }

    /// Register a subscriber the caller keeps a handle to.
    pub fn subscribe_shared(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        debug!(subscriber = subscriber.name(), "Registered subscriber");
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration { id, subscriber });
        id
    }

    /// Convenience for closure subscribers.
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let subscriber: FnSubscriber<F> = from_fn(name, callback);
        self.subscribe(subscriber)
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|r| r.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed_deliveries: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Deliveries scheduled but not yet finished.
    pub fn pending_deliveries(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until no delivery is outstanding; false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.tracker.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Shut down using the configured `shutdown_timeout`.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_within(self.config.shutdown_timeout).await
    }

    /// Stop accepting events, drain deliveries up to `timeout`, then cancel
    /// whatever has not started.
    pub async fn shutdown_within(&self, timeout: Duration) -> ShutdownReport {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Event bus already shut down");
        }
        self.tracker.close();

        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        let abandoned = if drained {
            0
        } else {
            self.cancel.cancel();
            let outstanding = self.tracker.len();
            warn!(
                outstanding,
                ?timeout,
                "Event bus shutdown timed out, cancelling pending deliveries"
            );
            outstanding
        };

        debug!(drained, "Event bus shut down");
        ShutdownReport { drained, abandoned }
    }

    fn dispatch(&self, event: &Event) {
        let targets: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| Arc::clone(&r.subscriber))
            .collect();
        if targets.is_empty() {
            return;
        }

        let event = Arc::new(event.clone());
        for subscriber in targets {
            let event = Arc::clone(&event);
            let permits = Arc::clone(&self.permits);
            let cancel = self.cancel.clone();
            let counters = Arc::clone(&self.counters);

            self.tracker.spawn_on(
                async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        permit = permits.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return,
                        },
                    };

                    let name = subscriber.name().to_string();
                    let event_id = event.id;
                    let outcome =
                        tokio::task::spawn_blocking(move || subscriber.on_event(&event)).await;
                    drop(permit);

                    match outcome {
                        Ok(Ok(())) => {
                            counters.delivered.fetch_add(1, Ordering::Relaxed);
                            trace!(subscriber = %name, event.id = %event_id, "Delivered event");
                        }
                        Ok(Err(e)) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(subscriber = %name, event.id = %event_id, error = %e, "Subscriber failed");
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(subscriber = %name, event.id = %event_id, error = %e, "Subscriber panicked");
                        }
                    }
                },
                &self.runtime,
            );
        }
    }
}
