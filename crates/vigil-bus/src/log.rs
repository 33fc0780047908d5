//! Persistent event log
//!
//! A single SQLite table keyed by an AUTOINCREMENT id, indexed on timestamp
//! and type. All appends go through one writer connection behind a mutex;
//! reads use a separate connection so queries never queue behind writes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, error, info, warn};

use vigil_core::sqlite::{self, Migration, MigrationEngine, SqliteTuning};
use vigil_core::{Event, EventId, EventType, NewEvent, SharedClock, TraceId};

use crate::error::{BusError, BusResult};

const EVENT_COLUMNS: &str = "id, trace_id, timestamp, event_type, source, payload, meta";

fn migrations() -> MigrationEngine {
    MigrationEngine::new(vec![Migration {
        version: 1,
        description: "Create events table",
        up: r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                ts_micros INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                source TEXT NOT NULL,
                payload TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts_micros);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
        "#,
    }])
}

/// Tunables for the event log writer.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// SQLite busy timeout per statement
    pub busy_timeout: Duration,
    /// Extra attempts after a failed append before giving up
    pub write_retries: u32,
    /// Base backoff between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            write_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Filter for [`EventLog::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub event_type: Option<EventType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            since: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of_type(mut self, event_type: impl Into<EventType>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Only events at or after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable, append-only event store.
pub struct EventLog {
    writer: Mutex<Connection>,
    /// `None` for in-memory logs, where a second connection would see a different database
    reader: Option<Mutex<Connection>>,
    clock: SharedClock,
    config: EventLogConfig,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventLog {
    /// Open (or create) the log database at `path` and apply migrations.
    pub fn open(
        path: impl AsRef<Path>,
        config: EventLogConfig,
        clock: SharedClock,
    ) -> BusResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BusError::unavailable("open", e))?;
        }

        let tuning = SqliteTuning {
            busy_timeout: config.busy_timeout,
            ..SqliteTuning::default()
        };
        let writer =
            sqlite::open_connection(path, &tuning).map_err(|e| BusError::unavailable("open", e))?;
        let version = migrations()
            .migrate(&writer)
            .map_err(|e| BusError::unavailable("migrate", e))?;
        let reader =
            sqlite::open_connection(path, &tuning).map_err(|e| BusError::unavailable("open", e))?;

        debug!(path = ?path, schema_version = version, "Opened event log");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            clock,
            config,
        })
    }

    /// Log backed by a private in-memory database.
    pub fn open_in_memory(clock: SharedClock) -> BusResult<Self> {
        let config = EventLogConfig::default();
        let tuning = SqliteTuning {
            wal_mode: false,
            busy_timeout: config.busy_timeout,
            ..SqliteTuning::default()
        };
        let writer =
            sqlite::open_in_memory(&tuning).map_err(|e| BusError::unavailable("open", e))?;
        migrations()
            .migrate(&writer)
            .map_err(|e| BusError::unavailable("migrate", e))?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
            clock,
            config,
        })
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock().unwrap_or_else(|e| e.into_inner()),
            None => self.writer(),
        }
    }

    /// Append an event, assigning its id.
    ///
    /// Retries up to `write_retries` times with linear backoff, then fails with
    /// [`BusError::StorageUnavailable`]. The event is never silently dropped.
    /// Payloads with non-finite numbers are rejected with
    /// [`BusError::InvalidEvent`] before anything is written.
    pub fn append(&self, mut event: NewEvent) -> BusResult<Event> {
        if let Some(field) = event.payload.non_finite_field() {
            return Err(BusError::InvalidEvent(format!(
                "payload field `{field}` is not a finite number"
            )));
        }

        let now = self.clock.now().trunc_subsecs(6);
        let timestamp = event.timestamp.unwrap_or(now).trunc_subsecs(6);
        event.timestamp = Some(timestamp);
        let trace_id = event
            .trace_id
            .get_or_insert_with(TraceId::generate)
            .clone();

        let payload = serde_json::to_string(&event.payload)?;
        let meta = serde_json::to_string(&event.meta)?;
        let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut attempt: u32 = 0;
        loop {
            let result = {
                let conn = self.writer();
                conn.execute(
                    "INSERT INTO events (trace_id, ts_micros, timestamp, event_type, source, payload, meta)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        trace_id.as_str(),
                        timestamp.timestamp_micros(),
                        stamp,
                        event.event_type.as_str(),
                        event.source,
                        payload,
                        meta
                    ],
                )
                .map(|_| conn.last_insert_rowid())
            };

            match result {
                Ok(id) => {
                    let event = event.into_event(EventId::new(id), now);
                    debug!(event.id = id, event.kind = %event.event_type, "Appended event");
                    return Ok(event);
                }
                Err(e) if attempt < self.config.write_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Event append failed, retrying");
                    thread::sleep(self.config.retry_backoff * attempt);
                }
                Err(e) => {
                    error!(
                        attempts = attempt + 1,
                        error = %e,
                        "Event storage unavailable, append failed"
                    );
                    return Err(BusError::unavailable("append", e));
                }
            }
        }
    }

    /// Events matching `query`, ordered by timestamp then id.
    pub fn query(&self, query: &EventQuery) -> BusResult<Vec<Event>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(event_type) = &query.event_type {
            args.push(Value::Text(event_type.as_str().to_string()));
            sql.push_str(&format!(" AND event_type = ?{}", args.len()));
        }
        if let Some(since) = query.since {
            args.push(Value::Integer(since.timestamp_micros()));
            sql.push_str(&format!(" AND ts_micros >= ?{}", args.len()));
        }
        args.push(Value::Integer(to_sql_count(query.limit)));
        sql.push_str(&format!(" ORDER BY ts_micros ASC, id ASC LIMIT ?{}", args.len()));
        args.push(Value::Integer(to_sql_count(query.offset)));
        sql.push_str(&format!(" OFFSET ?{}", args.len()));

        let conn = self.reader();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| BusError::QueryFailed(e.to_string()))?;
        let events = stmt
            .query_map(params_from_iter(args), row_to_event)
            .map_err(|e| BusError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BusError::QueryFailed(e.to_string()))?;
        Ok(events)
    }

    /// The most recent `limit` events, returned oldest first.
    pub fn tail(&self, limit: usize) -> BusResult<Vec<Event>> {
        let conn = self.reader();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events ORDER BY ts_micros DESC, id DESC LIMIT ?1"
            ))
            .map_err(|e| BusError::QueryFailed(e.to_string()))?;
        let mut events = stmt
            .query_map(params![to_sql_count(limit)], row_to_event)
            .map_err(|e| BusError::QueryFailed(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BusError::QueryFailed(e.to_string()))?;
        events.reverse();
        Ok(events)
    }

    pub fn get(&self, id: EventId) -> BusResult<Option<Event>> {
        let conn = self.reader();
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![id.get()],
            row_to_event,
        )
        .optional()
        .map_err(|e| BusError::QueryFailed(e.to_string()))
    }

    pub fn count(&self) -> BusResult<u64> {
        let conn = self.reader();
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(|e| BusError::QueryFailed(e.to_string()))
    }

    /// Delete events older than `days` days; returns how many were removed.
    pub fn retention(&self, days: u32) -> BusResult<usize> {
        let Some(cutoff) = self
            .clock
            .now()
            .checked_sub_signed(TimeDelta::days(i64::from(days)))
        else {
            debug!(days, "Retention cutoff precedes the representable range");
            return Ok(0);
        };
        let removed = self
            .writer()
            .execute(
                "DELETE FROM events WHERE ts_micros < ?1",
                params![cutoff.timestamp_micros()],
            )
            .map_err(|e| BusError::unavailable("retention", e))?;

        if removed > 0 {
            info!(removed, days, "Retention sweep removed old events");
        }
        Ok(removed)
    }
}

fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(2)?;
    let event_type: String = row.get(3)?;
    let payload: String = row.get(5)?;
    let meta: String = row.get(6)?;

    Ok(Event {
        id: EventId::new(row.get(0)?),
        trace_id: TraceId::from(row.get::<_, String>(1)?),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| conversion_error(2, e))?
            .with_timezone(&Utc),
        event_type: EventType::parse(&event_type),
        source: row.get(4)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e))?,
        meta: serde_json::from_str(&meta).map_err(|e| conversion_error(6, e))?,
    })
}
