//! Composition root
//!
//! [`Runtime::start`] builds every component from a [`VigilConfig`], wires
//! them together and owns their lifetimes. Nothing is global: each piece is
//! constructed here and handed to its users by `Arc`.
//!
//! Back references from the cycle path to the bus are `Weak`, since the bus
//! (through the trigger set) already holds the coordinator.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tracing::{info, warn};

use vigil_bus::{EventBus, EventLog, ShutdownReport};
use vigil_core::{Event, NewEvent, SharedClock, system_clock};
use vigil_cycle::{
    CountTrigger, CycleCoordinator, CycleError, CycleHandler, CycleKind, CycleRequester,
    DirectoryStaging, EmotionTrigger, IdleTrigger, RequestStatus, ResourcePressureTrigger,
    TriggerSet, WatchedStagingTrigger,
};
use vigil_memory::MemoryStore;

use crate::config::VigilConfig;
use crate::context::RuntimeIdleContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handler::{LoggingHandler, PersistingHandler, announce_report};
use crate::maintenance::Maintenance;
use crate::shutdown::shutdown_signal;

/// What happened during [`Runtime::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeShutdown {
    pub bus: ShutdownReport,
    /// Whether every running cycle finished inside the bus shutdown timeout
    pub cycles_finished: bool,
    /// WAL entries cleared by the final checkpoint
    pub checkpointed: usize,
}

/// Configures and starts a [`Runtime`].
pub struct RuntimeBuilder {
    config: VigilConfig,
    clock: SharedClock,
    handlers: HashMap<CycleKind, Arc<dyn CycleHandler>>,
}

impl RuntimeBuilder {
    pub fn new(config: VigilConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
            handlers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Assign the handler for `kind`. Reasoning and compression fall back to a
    /// logging no-op when left unassigned.
    #[must_use]
    pub fn handler<H: CycleHandler>(self, kind: CycleKind, handler: H) -> Self {
        self.handler_shared(kind, Arc::new(handler))
    }

    #[must_use]
    pub fn handler_shared(mut self, kind: CycleKind, handler: Arc<dyn CycleHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Validate the configuration, open the stores and start every loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> RuntimeResult<Runtime> {
        let Self {
            config,
            clock,
            mut handlers,
        } = self;
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?;

        fs::create_dir_all(&config.storage.data_dir)?;
        let log = Arc::new(EventLog::open(
            config.storage.event_db_path(),
            config.log.to_log_config(),
            clock.clone(),
        )?);
        let memory = Arc::new(MemoryStore::open(config.storage.memory(), clock.clone())?);
        if memory.recovered_operations() > 0 {
            info!(
                operations = memory.recovered_operations(),
                "Recovered uncommitted memory operations from WAL"
            );
        }

        let bus = Arc::new(EventBus::with_handle(
            Arc::clone(&log),
            config.bus.to_bus_config(),
            handle.clone(),
        ));

        let coordinator = CycleCoordinator::new(clock.clone());
        for kind in [CycleKind::Reasoning, CycleKind::Compression] {
            handlers
                .entry(kind)
                .or_insert_with(|| Arc::new(LoggingHandler));
        }
        for (kind, inner) in handlers {
            let handler = PersistingHandler::new(inner, Arc::clone(&memory), Arc::downgrade(&bus))
                .with_checkpoint_threshold(config.maintenance.checkpoint_threshold);
            coordinator.register(kind, handler);
        }
        let observer_bus = Arc::downgrade(&bus);
        coordinator.set_observer(move |report| announce_report(&observer_bus, report));

        let idle_context = Arc::new(RuntimeIdleContext::new(
            &config,
            clock.clone(),
            Arc::clone(&memory),
        ));
        let triggers = Arc::new(build_triggers(
            &config,
            &clock,
            &coordinator,
            Arc::clone(&idle_context),
        )?);

        bus.subscribe_shared(idle_context);
        bus.subscribe_shared(Arc::clone(&triggers) as Arc<dyn vigil_bus::Subscriber>);
        if let Err(e) = triggers.start_all() {
            triggers.stop_all();
            return Err(e.into());
        }

        let maintenance = Maintenance::spawn(
            &handle,
            &config.maintenance,
            config.snapshot_dir(),
            Arc::clone(&log),
            Arc::clone(&memory),
        );

        info!(
            data_dir = ?config.storage.data_dir,
            triggers = ?triggers.names(),
            cycle_kinds = ?coordinator.kinds(),
            "Vigil runtime started"
        );

        Ok(Runtime {
            config,
            clock,
            log,
            bus,
            coordinator,
            memory,
            triggers,
            maintenance,
            stopped: AtomicBool::new(false),
        })
    }
}

fn build_triggers(
    config: &VigilConfig,
    clock: &SharedClock,
    coordinator: &CycleCoordinator,
    idle_context: Arc<RuntimeIdleContext>,
) -> RuntimeResult<TriggerSet> {
    let requester: Arc<dyn CycleRequester> = Arc::new(coordinator.clone());
    let settings = &config.triggers;
    let triggers = TriggerSet::new();

    if settings.count.enabled {
        triggers.add(CountTrigger::new(
            settings.count.to_trigger_config(),
            Arc::clone(&requester),
        )?);
    }
    if settings.emotion.enabled {
        triggers.add(EmotionTrigger::new(
            settings.emotion.to_trigger_config(),
            Arc::clone(&requester),
        ));
    }
    if settings.idle.enabled {
        triggers.add(IdleTrigger::new(
            settings.idle.to_trigger_config(),
            clock.clone(),
            idle_context,
            Arc::clone(&requester),
        )?);
    }
    if settings.pressure.enabled {
        triggers.add(ResourcePressureTrigger::new(
            settings.pressure.to_trigger_config(),
            Arc::clone(&requester),
        ));
    }
    if let Some(dir) = &settings.staging.dir {
        triggers.add(WatchedStagingTrigger::new(
            settings.staging.to_trigger_config(),
            DirectoryStaging::new(dir),
            clock.clone(),
            requester,
        )?);
    }
    Ok(triggers)
}

/// A started Vigil instance.
pub struct Runtime {
    config: VigilConfig,
    clock: SharedClock,
    log: Arc<EventLog>,
    bus: Arc<EventBus>,
    coordinator: CycleCoordinator,
    memory: Arc<MemoryStore>,
    triggers: Arc<TriggerSet>,
    maintenance: Maintenance,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("data_dir", &self.config.storage.data_dir)
            .field("triggers", &self.triggers)
            .field("coordinator", &self.coordinator)
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Start with default handlers and the system clock.
    pub fn start(config: VigilConfig) -> RuntimeResult<Self> {
        RuntimeBuilder::new(config).start()
    }

    pub fn builder(config: VigilConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn publish(&self, event: NewEvent) -> RuntimeResult<Event> {
        Ok(self.bus.publish(event)?)
    }

    /// Ask for a cycle directly, bypassing the triggers.
    pub fn request_cycle(
        &self,
        kind: CycleKind,
        reason: &str,
    ) -> Result<RequestStatus, CycleError> {
        self.coordinator.request(kind, reason)
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn coordinator(&self) -> &CycleCoordinator {
        &self.coordinator
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn triggers(&self) -> &Arc<TriggerSet> {
        &self.triggers
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Run until SIGINT or SIGTERM, then shut down.
    pub async fn run_until_signal(&self) -> RuntimeResult<RuntimeShutdown> {
        shutdown_signal().await;
        self.shutdown().await
    }

    /// Stop triggers, drain the bus, let running cycles finish, stop
    /// maintenance and take a final checkpoint. Idempotent.
    pub async fn shutdown(&self) -> RuntimeResult<RuntimeShutdown> {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        if !first {
            warn!("Runtime shutdown requested twice");
        }

        let triggers = Arc::clone(&self.triggers);
        tokio::task::spawn_blocking(move || triggers.stop_all())
            .await?;

        let bus = self.bus.shutdown().await;

        let coordinator = self.coordinator.clone();
        let timeout = self.config.bus.shutdown_timeout;
        let cycles_finished = tokio::task::spawn_blocking(move || coordinator.shutdown(timeout))
            .await?;
        if !cycles_finished {
            warn!(?timeout, "Cycles still running at shutdown");
        }

        self.maintenance.shutdown().await;

        let memory = Arc::clone(&self.memory);
        let checkpointed = tokio::task::spawn_blocking(move || memory.checkpoint())
            .await??;

        info!(
            drained = bus.drained,
            abandoned = bus.abandoned,
            cycles_finished,
            checkpointed,
            "Vigil runtime stopped"
        );
        Ok(RuntimeShutdown {
            bus,
            cycles_finished,
            checkpointed,
        })
    }
}
