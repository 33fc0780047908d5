//! Single-flight cycle coordinator
//!
//! Every registered kind owns a slot with a cycle mutex and two flags.
//! `request` raises `pending` and starts a worker only when none is active,
//! so a burst of requests during a run collapses into one extra execution.
//! The worker clears `pending` under the mutex before each run and loops
//! while it finds it raised again afterwards.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use vigil_core::SharedClock;

use crate::cycle::{
    CycleHandler, CycleKind, CycleOutcome, CycleRequest, CycleRequester, RequestStatus,
};
use crate::error::CycleError;

/// Execution state of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
}

/// Per-kind counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub executions: u64,
    pub coalesced: u64,
    pub failures: u64,
}

/// Delivered to the outcome observer after every cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub request: CycleRequest,
    pub result: Result<CycleOutcome, CycleError>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

type Observer = Arc<dyn Fn(&CycleReport) + Send + Sync>;

struct Slot {
    kind: CycleKind,
    handler: RwLock<Arc<dyn CycleHandler>>,
    cycle_lock: Mutex<()>,
    pending: AtomicBool,
    worker_active: AtomicBool,
    running: AtomicBool,
    latest: Mutex<Option<CycleRequest>>,
    executions: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl Slot {
    fn new(kind: CycleKind, handler: Arc<dyn CycleHandler>) -> Self {
        Self {
            kind,
            handler: RwLock::new(handler),
            cycle_lock: Mutex::new(()),
            pending: AtomicBool::new(false),
            worker_active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            latest: Mutex::new(None),
            executions: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn is_busy(&self) -> bool {
        self.worker_active.load(Ordering::SeqCst) || self.pending.load(Ordering::SeqCst)
    }

    fn handler(&self) -> Arc<dyn CycleHandler> {
        Arc::clone(&self.handler.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn latest(&self) -> MutexGuard<'_, Option<CycleRequest>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Inner {
    slots: RwLock<HashMap<CycleKind, Arc<Slot>>>,
    observer: RwLock<Option<Observer>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    clock: SharedClock,
}

/// Runs at most one cycle per kind at a time, coalescing extra requests.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct CycleCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleCoordinator")
            .field("kinds", &self.kinds())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl CycleCoordinator {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                observer: RwLock::new(None),
                workers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                clock,
            }),
        }
    }

    /// Register the handler for `kind`, replacing any previous one.
    ///
    /// The kind keeps its slot, so replacing a handler never lets two cycles
    /// of that kind overlap. A cycle already running keeps the handler it
    /// started with; the next run picks up the new one.
    pub fn register<H: CycleHandler>(&self, kind: CycleKind, handler: H) {
        self.register_shared(kind, Arc::new(handler));
    }

    pub fn register_shared(&self, kind: CycleKind, handler: Arc<dyn CycleHandler>) {
        let mut slots = self.inner.slots.write().unwrap_or_else(|e| e.into_inner());
        match slots.get(&kind) {
            Some(slot) => {
                *slot.handler.write().unwrap_or_else(|e| e.into_inner()) = handler;
                debug!(cycle.kind = %kind, "Replaced cycle handler");
            }
            None => {
                debug!(cycle.kind = %kind, "Registered cycle handler");
                slots.insert(kind.clone(), Arc::new(Slot::new(kind, handler)));
            }
        }
    }

    /// Install the observer called after every completed cycle.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&CycleReport) + Send + Sync + 'static,
    {
        *self.inner.observer.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(observer));
    }

    pub fn kinds(&self) -> Vec<CycleKind> {
        let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut kinds: Vec<CycleKind> = slots.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn slot(&self, kind: &CycleKind) -> Option<Arc<Slot>> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .cloned()
    }

    /// Ask for a cycle of `kind`. Returns immediately in every case.
    pub fn request(&self, kind: CycleKind, reason: &str) -> Result<RequestStatus, CycleError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CycleError::ShuttingDown);
        }
        let slot = self
            .slot(&kind)
            .ok_or_else(|| CycleError::NoHandler(kind.clone()))?;

        *slot.latest() = Some(CycleRequest {
            kind: kind.clone(),
            reason: reason.to_string(),
            requested_at: self.inner.clock.now(),
        });
        slot.pending.store(true, Ordering::SeqCst);

        if slot
            .worker_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            slot.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(cycle.kind = %kind, reason, "Cycle already active, request coalesced");
            return Ok(RequestStatus::Coalesced);
        }

        let inner = Arc::clone(&self.inner);
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("vigil-cycle-{kind}"))
            .spawn(move || run_worker(&inner, &worker_slot));

        match spawned {
            Ok(handle) => {
                let mut workers = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
                Ok(RequestStatus::Started)
            }
            Err(e) => {
                slot.pending.store(false, Ordering::SeqCst);
                slot.worker_active.store(false, Ordering::SeqCst);
                error!(cycle.kind = %kind, error = %e, "Failed to spawn cycle worker");
                Err(CycleError::SpawnFailed {
                    kind,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn state(&self, kind: &CycleKind) -> Option<CycleState> {
        self.slot(kind).map(|slot| {
            if slot.running.load(Ordering::SeqCst) {
                CycleState::Running
            } else {
                CycleState::Idle
            }
        })
    }

    /// True when a request is waiting for the next run of `kind`.
    pub fn is_pending(&self, kind: &CycleKind) -> bool {
        self.slot(kind)
            .is_some_and(|slot| slot.pending.load(Ordering::SeqCst))
    }

    pub fn stats(&self, kind: &CycleKind) -> Option<CycleStats> {
        self.slot(kind).map(|slot| CycleStats {
            executions: slot.executions.load(Ordering::Relaxed),
            coalesced: slot.coalesced.load(Ordering::Relaxed),
            failures: slot.failures.load(Ordering::Relaxed),
        })
    }

    /// Block until no kind has an active worker or pending request.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let busy = {
                let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
                slots.values().any(|slot| slot.is_busy())
            };
            if !busy {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Reject further requests and wait for running workers.
    ///
    /// Returns false if workers were still active at the deadline; they are
    /// left to finish on their own.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closed.store(true, Ordering::Release);
        let idle = self.wait_idle(timeout);
        if idle {
            let workers: Vec<JoinHandle<()>> = self
                .inner
                .workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..)
                .collect();
            for handle in workers {
                if handle.join().is_err() {
                    error!("Cycle worker thread panicked");
                }
            }
        } else {
            warn!(?timeout, "Cycle coordinator shutdown timed out with cycles running");
        }
        idle
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl CycleRequester for CycleCoordinator {
    fn request(&self, kind: CycleKind, reason: &str) -> Result<RequestStatus, CycleError> {
        CycleCoordinator::request(self, kind, reason)
    }
}

fn run_worker(inner: &Inner, slot: &Slot) {
    loop {
        {
            let _guard = slot.cycle_lock.lock().unwrap_or_else(|e| e.into_inner());
            slot.pending.store(false, Ordering::SeqCst);
            let request = slot.latest().take().unwrap_or_else(|| CycleRequest {
                kind: slot.kind.clone(),
                reason: "pending".to_string(),
                requested_at: inner.clock.now(),
            });

            slot.running.store(true, Ordering::SeqCst);
            let report = execute(inner, slot, request);
            slot.running.store(false, Ordering::SeqCst);
            notify(inner, &report);
        }

        if slot.pending.load(Ordering::SeqCst) {
            continue;
        }
        slot.worker_active.store(false, Ordering::SeqCst);
        // A request landing between the check and the store saw an active
        // worker and coalesced; pick it up here.
        if slot.pending.load(Ordering::SeqCst)
            && slot
                .worker_active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            continue;
        }
        break;
    }
}

fn execute(inner: &Inner, slot: &Slot, request: CycleRequest) -> CycleReport {
    let started_at = inner.clock.now();
    let started = Instant::now();
    info!(cycle.kind = %request.kind, reason = %request.reason, "Cycle started");

    let handler = slot.handler();
    let result = match catch_unwind(AssertUnwindSafe(|| handler.run(&request))) {
        Ok(result) => result,
        Err(panic) => Err(CycleError::Panicked(panic_message(panic.as_ref()))),
    };
    let duration = started.elapsed();

    slot.executions.fetch_add(1, Ordering::Relaxed);
    match &result {
        Ok(_) => {
            info!(cycle.kind = %request.kind, ?duration, "Cycle completed");
        }
        Err(e) => {
            slot.failures.fetch_add(1, Ordering::Relaxed);
            warn!(cycle.kind = %request.kind, ?duration, error = %e, "Cycle failed");
        }
    }

    CycleReport {
        request,
        result,
        started_at,
        duration,
    }
}

fn notify(inner: &Inner, report: &CycleReport) {
    let observer = inner
        .observer
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    if let Some(observer) = observer {
        if catch_unwind(AssertUnwindSafe(|| observer(report))).is_err() {
            error!(cycle.kind = %report.request.kind, "Cycle observer panicked");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::handler_fn;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use vigil_core::system_clock;

    fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + deadline;
        while Instant::now() < until {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_burst_during_run_yields_exactly_one_extra_execution() {
        let coordinator = CycleCoordinator::new(system_clock());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let counter = Arc::clone(&runs);
        coordinator.register(
            CycleKind::Reasoning,
            handler_fn(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
                }
                Ok(CycleOutcome::default())
            }),
        );

        assert_eq!(
            coordinator.request(CycleKind::Reasoning, "first").unwrap(),
            RequestStatus::Started
        );
        assert!(wait_for(Duration::from_secs(2), || {
            coordinator.state(&CycleKind::Reasoning) == Some(CycleState::Running)
        }));

        for i in 0..25 {
            let status = coordinator
                .request(CycleKind::Reasoning, &format!("burst-{i}"))
                .unwrap();
            assert_eq!(status, RequestStatus::Coalesced);
        }
        release_tx.send(()).unwrap();

        assert!(coordinator.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let stats = coordinator.stats(&CycleKind::Reasoning).unwrap();
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.coalesced, 25);
        assert_eq!(coordinator.state(&CycleKind::Reasoning), Some(CycleState::Idle));
    }

    #[test]
    fn test_kinds_run_independently() {
        let coordinator = CycleCoordinator::new(system_clock());
        let (tx, rx) = mpsc::channel::<CycleKind>();
        for kind in [CycleKind::Reasoning, CycleKind::Compression] {
            let tx = Mutex::new(tx.clone());
            coordinator.register(
                kind,
                handler_fn(move |request| {
                    tx.lock().unwrap().send(request.kind.clone()).unwrap();
                    Ok(CycleOutcome::default())
                }),
            );
        }

        coordinator.request(CycleKind::Reasoning, "a").unwrap();
        coordinator.request(CycleKind::Compression, "b").unwrap();
        let mut seen = vec![
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec![CycleKind::Reasoning, CycleKind::Compression]);
    }

    #[test]
    fn test_failures_and_panics_keep_bookkeeping_intact() {
        let coordinator = CycleCoordinator::new(system_clock());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator.register(
            CycleKind::Compression,
            handler_fn(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(CycleError::failed("disk full")),
                1 => panic!("handler bug"),
                _ => Ok(CycleOutcome::default()),
            }),
        );

        for _ in 0..3 {
            coordinator.request(CycleKind::Compression, "retry").unwrap();
            assert!(coordinator.wait_idle(Duration::from_secs(2)));
        }

        let stats = coordinator.stats(&CycleKind::Compression).unwrap();
        assert_eq!(stats.executions, 3);
        assert_eq!(stats.failures, 2);
        assert_eq!(coordinator.state(&CycleKind::Compression), Some(CycleState::Idle));
    }

    #[test]
    fn test_observer_sees_every_report() {
        let coordinator = CycleCoordinator::new(system_clock());
        coordinator.register(
            CycleKind::Reasoning,
            handler_fn(|request| {
                Ok(CycleOutcome::default().with_suggestion(request.reason.clone()))
            }),
        );
        let reports: Arc<Mutex<Vec<CycleReport>>> = Arc::default();
        let sink = Arc::clone(&reports);
        coordinator.set_observer(move |report| sink.lock().unwrap().push(report.clone()));

        coordinator.request(CycleKind::Reasoning, "count:5").unwrap();
        assert!(coordinator.wait_idle(Duration::from_secs(2)));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].succeeded());
        assert_eq!(
            reports[0].result.as_ref().unwrap().suggestion.as_deref(),
            Some("count:5")
        );
    }

    #[test]
    fn test_unknown_kind_and_shutdown_are_rejected() {
        let coordinator = CycleCoordinator::new(system_clock());
        assert_eq!(
            coordinator.request(CycleKind::Named("nope".into()), "x"),
            Err(CycleError::NoHandler(CycleKind::Named("nope".into())))
        );

        coordinator.register(CycleKind::Reasoning, handler_fn(|_| Ok(CycleOutcome::default())));
        assert!(coordinator.shutdown(Duration::from_secs(1)));
        assert_eq!(
            coordinator.request(CycleKind::Reasoning, "late"),
            Err(CycleError::ShuttingDown)
        );
    }

    #[test]
    fn test_requests_from_many_threads_never_overlap() {
        let coordinator = CycleCoordinator::new(system_clock());
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let (a, o) = (Arc::clone(&active), Arc::clone(&overlap));
        coordinator.register(
            CycleKind::Reasoning,
            handler_fn(move |_| {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(2));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(CycleOutcome::default())
            }),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        coordinator.request(CycleKind::Reasoning, "load").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(coordinator.wait_idle(Duration::from_secs(5)));
        assert!(!overlap.load(Ordering::SeqCst));
        let stats = coordinator.stats(&CycleKind::Reasoning).unwrap();
        assert!(stats.executions >= 1);
        assert!(stats.executions <= 160);
        assert!(stats.coalesced < 160);
    }

    #[test]
    fn test_reregistering_during_a_run_keeps_one_cycle_in_flight() {
        let coordinator = CycleCoordinator::new(system_clock());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));
        let replacement_runs = Arc::new(AtomicUsize::new(0));

        let tracked = |extra: Option<Arc<AtomicUsize>>| {
            let (active, peak, release) =
                (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&release));
            handler_fn(move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if let Some(extra) = &extra {
                    extra.fetch_add(1, Ordering::SeqCst);
                }
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(2));
                }
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(CycleOutcome::default())
            })
        };

        coordinator.register(CycleKind::Reasoning, tracked(None));
        assert_eq!(
            coordinator.request(CycleKind::Reasoning, "first").unwrap(),
            RequestStatus::Started
        );
        assert!(wait_for(Duration::from_secs(5), || {
            coordinator.state(&CycleKind::Reasoning) == Some(CycleState::Running)
        }));

        coordinator.register(
            CycleKind::Reasoning,
            tracked(Some(Arc::clone(&replacement_runs))),
        );
        assert_eq!(
            coordinator.request(CycleKind::Reasoning, "second").unwrap(),
            RequestStatus::Coalesced
        );
        release.store(true, Ordering::SeqCst);

        assert!(coordinator.wait_idle(Duration::from_secs(5)));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(replacement_runs.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats(&CycleKind::Reasoning).unwrap();
        assert_eq!(stats.executions, 2);
    }
}
