//! Cross-crate scenarios: events flowing from the bus through triggers into
//! the coordinator, and memory surviving restarts.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vigil_workspace::bus::{EventBus, EventBusConfig, EventLog, SubscriberError};
use vigil_workspace::cycle::{
    CountConfig, CountTrigger, CycleCoordinator, CycleError, CycleKind, CycleOutcome,
    CycleRequester, IdleAction, IdleConfig, IdleSignals, IdleTrigger, RequestStatus, Trigger,
    TriggerSet, handler_fn,
};
use vigil_workspace::memory::{KnowledgeStore, NewKnowledge, WriteAheadLog};
use vigil_workspace::model::{Clock, EventId, EventType, ManualClock, NewEvent, system_clock};

#[derive(Default)]
struct RecordingRequester {
    requests: Mutex<Vec<(CycleKind, String)>>,
}

impl RecordingRequester {
    fn requests(&self) -> Vec<(CycleKind, String)> {
        self.requests.lock().unwrap().clone()
    }
}

impl CycleRequester for RecordingRequester {
    fn request(&self, kind: CycleKind, reason: &str) -> Result<RequestStatus, CycleError> {
        self.requests.lock().unwrap().push((kind, reason.to_string()));
        Ok(RequestStatus::Started)
    }
}

fn open_bus() -> (Arc<EventLog>, EventBus) {
    let log = Arc::new(EventLog::open_in_memory(system_clock()).unwrap());
    let bus = EventBus::new(Arc::clone(&log), EventBusConfig::default()).unwrap();
    (log, bus)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_count_trigger_fires_once_on_fifth_response() {
    let (_log, bus) = open_bus();
    let requester = Arc::new(RecordingRequester::default());
    let count = CountTrigger::new(
        CountConfig {
            event_type: EventType::DriverResponse,
            threshold: 5,
        },
        requester.clone(),
    )
    .unwrap();
    bus.subscribe_shared(Arc::new(TriggerSet::new().with(count)));

    bus.publish(NewEvent::new(EventType::UserInput, "user")).unwrap();
    for _ in 0..5 {
        bus.publish(NewEvent::new(EventType::DriverResponse, "driver"))
            .unwrap();
    }
    assert!(bus.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(
        requester.requests(),
        vec![(CycleKind::Reasoning, "count:5".to_string())]
    );

    // Counter restarted from zero: four more responses stay below threshold.
    for _ in 0..4 {
        bus.publish(NewEvent::new(EventType::DriverResponse, "driver"))
            .unwrap();
    }
    assert!(bus.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(requester.requests().len(), 1);
}

#[test]
fn test_count_trigger_resets_after_fire() {
    let requester = Arc::new(RecordingRequester::default());
    let mut count = CountTrigger::new(CountConfig::default(), requester.clone()).unwrap();
    let now = system_clock().now();

    for i in 1..=5 {
        let event =
            NewEvent::new(EventType::DriverResponse, "driver").into_event(EventId::new(i), now);
        let fired = count.check(&event).unwrap();
        assert_eq!(fired, i == 5);
    }
    assert_eq!(count.count(), 0);
    assert_eq!(requester.requests().len(), 1);
}

#[test]
fn test_idle_fires_once_then_activity_suppresses() {
    let clock = Arc::new(ManualClock::starting_now());
    let requester = Arc::new(RecordingRequester::default());
    let mut idle = IdleTrigger::new(
        IdleConfig {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            ..IdleConfig::default()
        },
        clock.clone(),
        Arc::new(IdleSignals {
            open_goals: 2,
            ..IdleSignals::default()
        }),
        requester.clone(),
    )
    .unwrap();

    clock.advance(Duration::from_secs(61));
    assert_eq!(idle.poll().unwrap(), Some(IdleAction::ReviewGoals));
    assert_eq!(
        requester.requests(),
        vec![(CycleKind::Reasoning, "idle:review_goals".to_string())]
    );

    clock.advance(Duration::from_secs(61));
    let activity =
        NewEvent::new(EventType::UserInput, "user").into_event(EventId::new(1), clock.now());
    idle.check(&activity).unwrap();
    clock.advance(Duration::from_secs(10));
    assert_eq!(idle.poll().unwrap(), None);
    assert_eq!(requester.requests().len(), 1);
}

#[test]
fn test_single_flight_burst_runs_exactly_twice() {
    let coordinator = CycleCoordinator::new(system_clock());
    let executions = Arc::new(AtomicU32::new(0));
    let release = Arc::new(AtomicBool::new(false));

    let (runs, gate) = (Arc::clone(&executions), Arc::clone(&release));
    coordinator.register(
        CycleKind::Reasoning,
        handler_fn(move |_req| {
            runs.fetch_add(1, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(CycleOutcome::default())
        }),
    );

    assert_eq!(
        coordinator.request(CycleKind::Reasoning, "first").unwrap(),
        RequestStatus::Started
    );
    while executions.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    for i in 0..50 {
        let status = coordinator
            .request(CycleKind::Reasoning, &format!("burst-{i}"))
            .unwrap();
        assert_eq!(status, RequestStatus::Coalesced);
    }
    release.store(true, Ordering::SeqCst);

    assert!(coordinator.wait_idle(Duration::from_secs(5)));
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    let stats = coordinator.stats(&CycleKind::Reasoning).unwrap();
    assert_eq!(stats.executions, 2);
    assert_eq!(stats.coalesced, 50);
    assert!(coordinator.shutdown(Duration::from_secs(1)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_subscriber_sees_every_event_despite_failures() {
    let (_log, bus) = open_bus();
    let seen: Vec<Arc<AtomicU32>> = (0..3).map(|_| Arc::new(AtomicU32::new(0))).collect();

    for (i, counter) in seen.iter().enumerate() {
        let counter = Arc::clone(counter);
        bus.subscribe_fn(format!("sub-{i}"), move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            if i == 1 {
                return Err(SubscriberError("always fails".into()));
            }
            Ok(())
        });
    }

    for n in 0..10 {
        bus.publish(NewEvent::new(EventType::System, "test").with_text(format!("n={n}")))
            .unwrap();
    }
    assert!(bus.wait_idle(Duration::from_secs(5)).await);

    for counter in &seen {
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
    let stats = bus.stats();
    assert_eq!(stats.published, 10);
    assert_eq!(stats.delivered, 20);
    assert_eq!(stats.failed_deliveries, 10);
}

#[test]
fn test_wal_entries_survive_restart_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.wal");
    {
        let wal = WriteAheadLog::open(&path, system_clock()).unwrap();
        for n in 0..3 {
            wal.append("push_short_term", serde_json::json!({ "n": n }))
                .unwrap();
        }
    }

    let wal = WriteAheadLog::open(&path, system_clock()).unwrap();
    let entries = wal.replay().unwrap();
    let order: Vec<i64> = entries.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);

    wal.clear().unwrap();
    assert!(wal.replay().unwrap().is_empty());
}

#[test]
fn test_knowledge_upsert_keeps_highest_confidence() {
    let knowledge = KnowledgeStore::open_in_memory(system_clock()).unwrap();
    let (first, _) = knowledge
        .add(&NewKnowledge::new("the sky is blue", "fact", "chat", 0.5))
        .unwrap();
    let (second, _) = knowledge
        .add(&NewKnowledge::new("the sky is blue", "fact", "chat", 0.9))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(knowledge.count().unwrap(), 1);
    assert_eq!(knowledge.get(&first).unwrap().unwrap().confidence, 0.9);
}
