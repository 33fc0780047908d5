//! Property-based tests for event ordering and WAL repair

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;
use vigil_workspace::bus::{EventLog, EventQuery};
use vigil_workspace::memory::WriteAheadLog;
use vigil_workspace::model::{Clock, EventType, NewEvent, add_duration, system_clock};

fn event_type_strategy() -> impl Strategy<Value = EventType> {
    prop_oneof![
        Just(EventType::UserInput),
        Just(EventType::DriverResponse),
        Just(EventType::System),
        "[a-z]{3,10}".prop_map(EventType::Custom),
    ]
}

// Offsets in seconds from a common base, deliberately unsorted.
fn events_strategy() -> impl Strategy<Value = Vec<(EventType, u64)>> {
    prop::collection::vec((event_type_strategy(), 0u64..10_000), 1..60)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: query results are ordered by timestamp and ids are unique and stable
    #[test]
    fn prop_query_orders_by_timestamp_with_unique_ids(events in events_strategy()) {
        let log = EventLog::open_in_memory(system_clock()).unwrap();
        let base = system_clock().now();

        let mut appended = Vec::new();
        for (event_type, offset) in &events {
            let at = add_duration(base, Duration::from_secs(*offset));
            appended.push(log.append(NewEvent::new(event_type.clone(), "prop").at(at)).unwrap());
        }

        let all = log.query(&EventQuery::new().limit(events.len())).unwrap();
        prop_assert_eq!(all.len(), events.len());
        for pair in all.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        let ids: HashSet<_> = all.iter().map(|e| e.id).collect();
        prop_assert_eq!(ids.len(), all.len());

        for event in &appended {
            let stored = log.get(event.id).unwrap();
            prop_assert_eq!(stored.as_ref(), Some(event));
        }
    }

    /// Property: repair drops exactly the invalid lines and keeps the order of the rest
    #[test]
    fn prop_wal_repair_removes_only_corrupt_lines(
        lines in prop::collection::vec(prop::bool::ANY, 1..40)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.wal");

        let mut raw = String::new();
        let mut expected = Vec::new();
        {
            let wal = WriteAheadLog::open(&path, system_clock()).unwrap();
            for (n, valid) in lines.iter().enumerate() {
                if *valid {
                    let entry = wal.append("push_long_term", serde_json::json!({ "n": n })).unwrap();
                    expected.push(n as u64);
                    raw.push_str(&serde_json::to_string(&entry).unwrap());
                } else {
                    raw.push_str(&format!("{{\"broken\": {n}"));
                }
                raw.push('\n');
            }
        }
        std::fs::write(&path, &raw).unwrap();

        let wal = WriteAheadLog::open(&path, system_clock()).unwrap();
        let before = wal.verify().unwrap();
        let corrupt = lines.iter().filter(|v| !**v).count();
        prop_assert_eq!(before.corrupt_lines.len(), corrupt);

        prop_assert_eq!(wal.repair().unwrap(), corrupt);
        prop_assert!(wal.verify().unwrap().is_clean());

        let kept: Vec<u64> = wal
            .replay()
            .unwrap()
            .iter()
            .map(|e| e.data["n"].as_u64().unwrap())
            .collect();
        prop_assert_eq!(kept, expected);
    }
}
