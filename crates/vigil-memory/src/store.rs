//! Dirty-flag batched commit layer
//!
//! Every mutation is recorded in the WAL, applied in memory, and marks its
//! collection dirty. Commits rewrite a dirty collection file atomically and
//! clear the flag; a failed commit leaves it set so the next one retries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigil_core::SharedClock;

use crate::error::{MemoryError, MemoryResult};
use crate::item::MemoryItem;
use crate::knowledge::{KnowledgeStore, NewKnowledge, Upsert};
use crate::persist;
use crate::snapshot::MemorySnapshot;
use crate::wal::{WalEntry, WriteAheadLog};

pub const SHORT_TERM_FILE: &str = "short_term.json";
pub const LONG_TERM_FILE: &str = "long_term.json";

/// WAL operation tags
pub mod ops {
    pub const SHORT_TERM_PUSH: &str = "short_term.push";
    pub const SHORT_TERM_DRAIN: &str = "short_term.drain";
    pub const LONG_TERM_PUSH: &str = "long_term.push";
    pub const LONG_TERM_REMOVE: &str = "long_term.remove";
    pub const KNOWLEDGE_ADD: &str = "knowledge.add";
}

/// Where the store keeps its files
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub knowledge_file: String,
}

impl MemoryConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            wal_file: "memory.wal".to_string(),
            knowledge_file: "knowledge.db".to_string(),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join(&self.knowledge_file)
    }
}

#[derive(Debug)]
struct Collection {
    name: &'static str,
    path: PathBuf,
    items: Vec<MemoryItem>,
    dirty: bool,
}

impl Collection {
    fn load(name: &'static str, path: PathBuf) -> MemoryResult<Self> {
        let items = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| MemoryError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(MemoryError::LoadFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self {
            name,
            path,
            items,
            dirty: false,
        })
    }

    fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    fn commit(&mut self) -> MemoryResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let bytes = serde_json::to_vec_pretty(&self.items)?;
        persist::write_atomic(&self.path, &bytes).map_err(|e| {
            error!(collection = self.name, path = ?self.path, error = %e, "Failed to commit memory collection");
            MemoryError::CommitFailed {
                collection: self.name,
                reason: e.to_string(),
            }
        })?;
        self.dirty = false;
        debug!(collection = self.name, items = self.items.len(), "Committed memory collection");
        Ok(true)
    }
}

/// WAL-backed short-term, long-term and knowledge memory.
pub struct MemoryStore {
    config: MemoryConfig,
    wal: WriteAheadLog,
    knowledge: KnowledgeStore,
    short_term: Mutex<Collection>,
    long_term: Mutex<Collection>,
    // Held across a knowledge add's WAL append and upsert, and by checkpoint.
    knowledge_gate: Mutex<()>,
    clock: SharedClock,
    recovered: usize,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("data_dir", &self.config.data_dir)
            .field("wal_entries", &self.wal.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Load both collections, replay the WAL into them, commit, and clear the
    /// WAL once everything recovered is on disk.
    pub fn open(config: MemoryConfig, clock: SharedClock) -> MemoryResult<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let short_term = Collection::load("short_term", config.data_dir.join(SHORT_TERM_FILE))?;
        let long_term = Collection::load("long_term", config.data_dir.join(LONG_TERM_FILE))?;
        let wal = WriteAheadLog::open(config.wal_path(), clock.clone())?;
        let knowledge = KnowledgeStore::open(config.knowledge_path(), clock.clone())?;

        let mut store = Self {
            config,
            wal,
            knowledge,
            short_term: Mutex::new(short_term),
            long_term: Mutex::new(long_term),
            knowledge_gate: Mutex::new(()),
            clock,
            recovered: 0,
        };
        store.recover()?;
        Ok(store)
    }

    fn recover(&mut self) -> MemoryResult<()> {
        let entries = self.wal.replay()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut applied = 0usize;
        let mut deferred = 0usize;
        for entry in &entries {
            match self.apply(entry) {
                Ok(()) => applied += 1,
                // Malformed or unknown records can never apply; dropping them is safe.
                Err(e @ MemoryError::Serialization(_)) => {
                    warn!(operation = %entry.operation, error = %e, "Skipping unreplayable WAL record");
                }
                Err(e) => {
                    deferred += 1;
                    warn!(operation = %entry.operation, error = %e, "WAL record not absorbed by storage");
                }
            }
        }
        self.recovered = applied;

        match self.force_save_all() {
            Ok(()) if deferred == 0 => {
                self.wal.clear()?;
                info!(replayed = applied, total = entries.len(), "Recovered memory from WAL");
            }
            Ok(()) => {
                warn!(
                    replayed = applied,
                    deferred,
                    "WAL records still pending, keeping WAL for next start"
                );
            }
            Err(e) => {
                warn!(error = %e, "Recovered memory not committed, keeping WAL for next start");
            }
        }
        Ok(())
    }

    fn apply(&self, entry: &WalEntry) -> MemoryResult<()> {
        match entry.operation.as_str() {
            ops::SHORT_TERM_PUSH => {
                let item: MemoryItem = serde_json::from_value(entry.data.clone())?;
                let mut short_term = self.short();
                if !short_term.contains(item.id) {
                    short_term.items.push(item);
                }
                short_term.dirty = true;
            }
            ops::SHORT_TERM_DRAIN => {
                let ids: Vec<Uuid> = serde_json::from_value(entry.data["ids"].clone())?;
                let mut short_term = self.short();
                for id in ids {
                    short_term.remove(id);
                }
                short_term.dirty = true;
            }
            ops::LONG_TERM_PUSH => {
                let item: MemoryItem = serde_json::from_value(entry.data.clone())?;
                let mut long_term = self.long();
                if !long_term.contains(item.id) {
                    long_term.items.push(item);
                }
                long_term.dirty = true;
            }
            ops::LONG_TERM_REMOVE => {
                let id: Uuid = serde_json::from_value(entry.data["id"].clone())?;
                let mut long_term = self.long();
                long_term.remove(id);
                long_term.dirty = true;
            }
            ops::KNOWLEDGE_ADD => {
                let knowledge: NewKnowledge = serde_json::from_value(entry.data.clone())?;
                self.knowledge.add(&knowledge)?;
            }
            other => {
                return Err(MemoryError::Serialization(format!(
                    "unknown WAL operation '{other}'"
                )));
            }
        }
        Ok(())
    }

    fn short(&self) -> MutexGuard<'_, Collection> {
        self.short_term.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn long(&self) -> MutexGuard<'_, Collection> {
        self.long_term.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn knowledge_gate(&self) -> MutexGuard<'_, ()> {
        self.knowledge_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Operations replayed from the WAL when the store was opened.
    pub fn recovered_operations(&self) -> usize {
        self.recovered
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn push_short_term(&self, item: MemoryItem) -> MemoryResult<()> {
        let mut short_term = self.short();
        self.wal
            .append(ops::SHORT_TERM_PUSH, serde_json::to_value(&item)?)?;
        short_term.items.push(item);
        short_term.dirty = true;
        Ok(())
    }

    /// Remove and return every short-term item.
    pub fn drain_short_term(&self) -> MemoryResult<Vec<MemoryItem>> {
        let mut short_term = self.short();
        if short_term.items.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = short_term.items.iter().map(|item| item.id).collect();
        self.wal.append(ops::SHORT_TERM_DRAIN, json!({ "ids": ids }))?;
        short_term.dirty = true;
        Ok(std::mem::take(&mut short_term.items))
    }

    pub fn push_long_term(&self, item: MemoryItem) -> MemoryResult<()> {
        let mut long_term = self.long();
        self.wal
            .append(ops::LONG_TERM_PUSH, serde_json::to_value(&item)?)?;
        long_term.items.push(item);
        long_term.dirty = true;
        Ok(())
    }

    /// Returns whether the item was present.
    pub fn remove_long_term(&self, id: Uuid) -> MemoryResult<bool> {
        let mut long_term = self.long();
        if !long_term.contains(id) {
            return Ok(false);
        }
        self.wal.append(ops::LONG_TERM_REMOVE, json!({ "id": id }))?;
        long_term.remove(id);
        long_term.dirty = true;
        Ok(true)
    }

    /// Idempotent upsert keyed by content hash; returns the hash.
    pub fn add_knowledge(
        &self,
        content: &str,
        category: &str,
        source: &str,
        confidence: f64,
    ) -> MemoryResult<(String, Upsert)> {
        self.add_knowledge_record(&NewKnowledge::new(content, category, source, confidence))
    }

    pub fn add_knowledge_record(&self, knowledge: &NewKnowledge) -> MemoryResult<(String, Upsert)> {
        let _gate = self.knowledge_gate();
        self.wal
            .append(ops::KNOWLEDGE_ADD, serde_json::to_value(knowledge)?)?;
        self.knowledge.add(knowledge)
    }

    pub fn short_term(&self) -> Vec<MemoryItem> {
        self.short().items.clone()
    }

    pub fn long_term(&self) -> Vec<MemoryItem> {
        self.long().items.clone()
    }

    /// Items in either collection carrying `tag`.
    pub fn count_tagged(&self, tag: &str) -> usize {
        let short = self.short().items.iter().filter(|i| i.has_tag(tag)).count();
        let long = self.long().items.iter().filter(|i| i.has_tag(tag)).count();
        short + long
    }

    pub fn is_short_term_dirty(&self) -> bool {
        self.short().dirty
    }

    pub fn is_long_term_dirty(&self) -> bool {
        self.long().dirty
    }

    /// Persist short-term memory if dirty; true if a write happened.
    pub fn commit_short_term(&self) -> MemoryResult<bool> {
        self.short().commit()
    }

    pub fn commit_long_term(&self) -> MemoryResult<bool> {
        self.long().commit()
    }

    /// Commit every dirty collection, attempting all; reports the first failure.
    pub fn force_save_all(&self) -> MemoryResult<()> {
        let short = self.commit_short_term();
        let long = self.commit_long_term();
        short.and(long).map(|_| ())
    }

    /// Commit everything, then clear the WAL. Returns the cleared entry count.
    pub fn checkpoint(&self) -> MemoryResult<usize> {
        // Hold every writer so no mutation lands between commit and clear.
        let _gate = self.knowledge_gate();
        let mut short_term = self.short();
        let mut long_term = self.long();
        let short = short_term.commit();
        let long = long_term.commit();
        short.and(long)?;

        let cleared = self.wal.len();
        self.wal.clear()?;
        info!(cleared, "Memory checkpoint complete");
        Ok(cleared)
    }

    pub fn snapshot_now(&self) -> MemoryResult<MemorySnapshot> {
        Ok(MemorySnapshot {
            created_at: self.clock.now(),
            short_term: self.short_term(),
            long_term: self.long_term(),
            knowledge: self.knowledge.list(None)?,
        })
    }

    /// Write a snapshot file into `dir`; returns its path.
    pub fn snapshot(&self, dir: &Path) -> MemoryResult<PathBuf> {
        let path = self.snapshot_now()?.write_to(dir)?;
        info!(path = ?path, "Wrote memory snapshot");
        Ok(path)
    }
}
