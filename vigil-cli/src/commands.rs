//! Offline maintenance commands over the durable stores
//!
//! Each command opens only the store it needs and writes its output to the
//! given writer, one JSON document per line.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use vigil::VigilConfig;
use vigil_bus::{BusError, EventLog, EventQuery};
use vigil_core::{SharedClock, system_clock};
use vigil_memory::{KnowledgeStore, MemoryError, MemoryStore, NewKnowledge, WriteAheadLog};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("invalid --since timestamp '{value}': {reason}")]
    InvalidSince { value: String, reason: String },

    #[error("confidence must be between 0.0 and 1.0, got {0}")]
    InvalidConfidence(f64),

    #[error("output failed: {0}")]
    Output(#[from] std::io::Error),

    #[error("output encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Stores resolved from a loaded configuration.
pub struct Stores<'a> {
    config: &'a VigilConfig,
    clock: SharedClock,
}

impl<'a> Stores<'a> {
    pub fn new(config: &'a VigilConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
        }
    }

    fn event_log(&self) -> CommandResult<EventLog> {
        Ok(EventLog::open(
            self.config.storage.event_db_path(),
            self.config.log.to_log_config(),
            self.clock.clone(),
        )?)
    }

    fn wal(&self) -> CommandResult<WriteAheadLog> {
        Ok(WriteAheadLog::open(
            self.config.storage.memory().wal_path(),
            self.clock.clone(),
        )?)
    }

    fn knowledge(&self) -> CommandResult<KnowledgeStore> {
        Ok(KnowledgeStore::open(
            self.config.storage.memory().knowledge_path(),
            self.clock.clone(),
        )?)
    }

    fn memory(&self) -> CommandResult<MemoryStore> {
        Ok(MemoryStore::open(self.config.storage.memory(), self.clock.clone())?)
    }
}

fn emit<T: Serialize>(out: &mut impl Write, value: &T) -> CommandResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn parse_since(value: &str) -> CommandResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CommandError::InvalidSince {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

pub fn events_tail(
    stores: &Stores<'_>,
    limit: usize,
    out: &mut impl Write,
) -> CommandResult<usize> {
    let events = stores.event_log()?.tail(limit)?;
    for event in &events {
        emit(out, event)?;
    }
    Ok(events.len())
}

pub fn events_query(
    stores: &Stores<'_>,
    query: &EventQuery,
    out: &mut impl Write,
) -> CommandResult<usize> {
    let events = stores.event_log()?.query(query)?;
    for event in &events {
        emit(out, event)?;
    }
    Ok(events.len())
}

pub fn events_retention(
    stores: &Stores<'_>,
    days: u32,
    out: &mut impl Write,
) -> CommandResult<usize> {
    let removed = stores.event_log()?.retention(days)?;
    emit(out, &serde_json::json!({ "removed": removed, "retention_days": days }))?;
    Ok(removed)
}

pub fn wal_verify(stores: &Stores<'_>, out: &mut impl Write) -> CommandResult<bool> {
    let report = stores.wal()?.verify()?;
    emit(
        out,
        &serde_json::json!({
            "valid": report.valid,
            "corrupt_lines": report.corrupt_lines,
        }),
    )?;
    Ok(report.is_clean())
}

pub fn wal_repair(stores: &Stores<'_>, out: &mut impl Write) -> CommandResult<usize> {
    let removed = stores.wal()?.repair()?;
    emit(out, &serde_json::json!({ "removed": removed }))?;
    Ok(removed)
}

pub fn knowledge_add(
    stores: &Stores<'_>,
    knowledge: &NewKnowledge,
    out: &mut impl Write,
) -> CommandResult<String> {
    if !(0.0..=1.0).contains(&knowledge.confidence) {
        return Err(CommandError::InvalidConfidence(knowledge.confidence));
    }
    let (hash, upsert) = stores.knowledge()?.add(knowledge)?;
    emit(
        out,
        &serde_json::json!({
            "content_hash": hash,
            "result": format!("{upsert:?}").to_lowercase(),
        }),
    )?;
    Ok(hash)
}

pub fn knowledge_list(
    stores: &Stores<'_>,
    category: Option<&str>,
    out: &mut impl Write,
) -> CommandResult<usize> {
    let records = stores.knowledge()?.list(category)?;
    for record in &records {
        emit(out, record)?;
    }
    Ok(records.len())
}

pub fn knowledge_purge(
    stores: &Stores<'_>,
    hash: &str,
    out: &mut impl Write,
) -> CommandResult<bool> {
    let removed = stores.knowledge()?.purge(hash)?;
    emit(out, &serde_json::json!({ "content_hash": hash, "removed": removed }))?;
    Ok(removed)
}

pub fn snapshot(
    stores: &Stores<'_>,
    dir: Option<&Path>,
    out: &mut impl Write,
) -> CommandResult<PathBuf> {
    let dir = dir.map_or_else(|| stores.config.snapshot_dir(), Path::to_path_buf);
    let path = stores.memory()?.snapshot(&dir)?;
    emit(out, &serde_json::json!({ "path": path }))?;
    Ok(path)
}
