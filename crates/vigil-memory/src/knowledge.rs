//! Content-hash keyed knowledge store
//!
//! Each record is identified by `hex(SHA-256(category ‖ 0x1F ‖ content))`.
//! Adding the same fact again never duplicates it: confidence rises to the
//! higher of the two values and `verified_at` is refreshed.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use vigil_core::SharedClock;
use vigil_core::sqlite::{self, Migration, MigrationEngine, SqliteTuning};

use crate::error::MemoryResult;

fn migrations() -> MigrationEngine {
    MigrationEngine::new(vec![Migration {
        version: 1,
        description: "create knowledge table",
        up: r#"
            CREATE TABLE IF NOT EXISTS knowledge (
                content_hash TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence REAL NOT NULL,
                verified_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge(category);
        "#,
    }])
}

/// Identity of a (category, content) pair.
pub fn content_hash(category: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update([0x1F]);
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub content_hash: String,
    pub content: String,
    pub category: String,
    pub source: String,
    pub confidence: f64,
    pub verified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// A fact to add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledge {
    pub content: String,
    pub category: String,
    pub source: String,
    pub confidence: f64,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl NewKnowledge {
    pub fn new(
        content: impl Into<String>,
        category: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            source: source.into(),
            confidence,
            meta: serde_json::Map::new(),
        }
    }

    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Whether an upsert created a record or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Refreshed,
}

pub struct KnowledgeStore {
    conn: Mutex<Connection>,
    clock: SharedClock,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore").finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    pub fn open(path: impl AsRef<Path>, clock: SharedClock) -> MemoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = sqlite::open_connection(path, &SqliteTuning::default())?;
        let version = migrations().migrate(&conn)?;
        debug!(path = ?path, schema_version = version, "Opened knowledge store");
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn open_in_memory(clock: SharedClock) -> MemoryResult<Self> {
        let tuning = SqliteTuning {
            wal_mode: false,
            ..SqliteTuning::default()
        };
        let conn = sqlite::open_in_memory(&tuning)?;
        migrations().migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert, or raise confidence and refresh `verified_at` for a known fact.
    pub fn add(&self, knowledge: &NewKnowledge) -> MemoryResult<(String, Upsert)> {
        let hash = content_hash(&knowledge.category, &knowledge.content);
        let confidence = clamp_confidence(knowledge.confidence);
        let now = self.clock.now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let meta = serde_json::to_string(&knowledge.meta)?;

        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let existing: Option<f64> = tx
            .query_row(
                "SELECT confidence FROM knowledge WHERE content_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;

        let upsert = match existing {
            Some(previous) => {
                tx.execute(
                    "UPDATE knowledge SET confidence = ?2, verified_at = ?3 WHERE content_hash = ?1",
                    params![hash, previous.max(confidence), now],
                )?;
                Upsert::Refreshed
            }
            None => {
                tx.execute(
                    "INSERT INTO knowledge
                        (content_hash, content, category, source, confidence, verified_at, created_at, meta)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                    params![
                        hash,
                        knowledge.content,
                        knowledge.category,
                        knowledge.source,
                        confidence,
                        now,
                        meta
                    ],
                )?;
                Upsert::Inserted
            }
        };
        tx.commit()?;
        debug!(content_hash = %hash, ?upsert, category = %knowledge.category, "Knowledge upserted");
        Ok((hash, upsert))
    }

    pub fn get(&self, content_hash: &str) -> MemoryResult<Option<KnowledgeRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT content_hash, content, category, source, confidence, verified_at, created_at, meta
                 FROM knowledge WHERE content_hash = ?1",
                params![content_hash],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Records ordered by creation time, optionally within one category.
    pub fn list(&self, category: Option<&str>) -> MemoryResult<Vec<KnowledgeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT content_hash, content, category, source, confidence, verified_at, created_at, meta
             FROM knowledge
             WHERE ?1 IS NULL OR category = ?1
             ORDER BY created_at ASC, content_hash ASC",
        )?;
        let records = stmt
            .query_map(params![category], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> MemoryResult<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Administrative delete; returns whether a record existed.
    pub fn purge(&self, content_hash: &str) -> MemoryResult<bool> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM knowledge WHERE content_hash = ?1",
            params![content_hash],
        )?;
        if removed > 0 {
            info!(content_hash, "Purged knowledge record");
        }
        Ok(removed > 0)
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<KnowledgeRecord> {
    let verified_at: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let meta: String = row.get(7)?;
    Ok(KnowledgeRecord {
        content_hash: row.get(0)?,
        content: row.get(1)?,
        category: row.get(2)?,
        source: row.get(3)?,
        confidence: row.get(4)?,
        verified_at: parse_time(5, &verified_at)?,
        created_at: parse_time(6, &created_at)?,
        meta: serde_json::from_str(&meta).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
    })
}
