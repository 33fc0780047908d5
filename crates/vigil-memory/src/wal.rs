//! Write-ahead log
//!
//! One JSON object per line:
//!
//! ```text
//! {"timestamp":1760400000.25,"datetime":"2025-10-14T00:00:00.250Z","operation":"short_term.push","data":{...}}
//! ```
//!
//! `append` returns only after the line is flushed and fsynced. Lines that fail
//! structural validation are skipped on replay and reported, never fatal.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use vigil_core::SharedClock;

use crate::error::{MemoryError, MemoryResult};
use crate::persist;

/// One recorded intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Unix seconds with fractional part
    pub timestamp: f64,
    /// The same instant in RFC 3339
    pub datetime: String,
    pub operation: String,
    pub data: Value,
}

impl WalEntry {
    pub fn new(operation: impl Into<String>, data: Value, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.timestamp_micros() as f64 / 1_000_000.0,
            datetime: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            operation: operation.into(),
            data,
        }
    }

    /// Parse one line if it is a structurally valid record.
    pub fn parse_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        let object = value.as_object()?;
        let timestamp = object.get("timestamp")?.as_f64()?;
        let datetime = object.get("datetime")?.as_str()?;
        let operation = object.get("operation")?.as_str().filter(|op| !op.is_empty())?;
        let data = object.get("data")?;

        Some(Self {
            timestamp,
            datetime: datetime.to_string(),
            operation: operation.to_string(),
            data: data.clone(),
        })
    }
}

/// Result of [`WriteAheadLog::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalVerification {
    pub valid: usize,
    /// 1-based line numbers of invalid records
    pub corrupt_lines: Vec<usize>,
}

impl WalVerification {
    pub fn is_clean(&self) -> bool {
        self.corrupt_lines.is_empty()
    }
}

enum Line {
    Valid(WalEntry, String),
    Corrupt(usize),
}

/// Append-only, fsynced, newline-delimited JSON log.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
    entries: AtomicUsize,
    clock: SharedClock,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

impl WriteAheadLog {
    /// Open or create the log at `path`.
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> MemoryResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MemoryError::wal("open", parent, e))?;
        }
        let file = open_append(&path)?;
        let wal = Self {
            path,
            file: Mutex::new(file),
            entries: AtomicUsize::new(0),
            clock,
        };
        let valid = wal
            .scan()?
            .iter()
            .filter(|line| matches!(line, Line::Valid(..)))
            .count();
        wal.entries.store(valid, Ordering::SeqCst);
        debug!(path = ?wal.path, entries = valid, "Opened write-ahead log");
        Ok(wal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `operation` durably before it is applied.
    pub fn append(&self, operation: &str, data: Value) -> MemoryResult<WalEntry> {
        let entry = WalEntry::new(operation, data, self.clock.now());
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = self.file();
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| MemoryError::wal("append", &self.path, e))?;
        self.entries.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    /// Every valid record in append order. Invalid lines are skipped and counted.
    pub fn replay(&self) -> MemoryResult<Vec<WalEntry>> {
        let _guard = self.file();
        let mut entries = Vec::new();
        let mut discarded = 0usize;
        for line in self.scan()? {
            match line {
                Line::Valid(entry, _) => entries.push(entry),
                Line::Corrupt(_) => discarded += 1,
            }
        }
        if discarded > 0 {
            warn!(path = ?self.path, discarded, "WAL corruption: skipped invalid records during replay");
        }
        Ok(entries)
    }

    /// Truncate to empty and fsync.
    pub fn clear(&self) -> MemoryResult<()> {
        let file = self.file();
        file.set_len(0)
            .and_then(|()| file.sync_all())
            .map_err(|e| MemoryError::wal("clear", &self.path, e))?;
        self.entries.store(0, Ordering::SeqCst);
        debug!(path = ?self.path, "Cleared write-ahead log");
        Ok(())
    }

    pub fn verify(&self) -> MemoryResult<WalVerification> {
        let _guard = self.file();
        let mut report = WalVerification::default();
        for line in self.scan()? {
            match line {
                Line::Valid(..) => report.valid += 1,
                Line::Corrupt(number) => report.corrupt_lines.push(number),
            }
        }
        Ok(report)
    }

    /// Atomically rewrite the log keeping only valid records; returns how many
    /// lines were dropped.
    pub fn repair(&self) -> MemoryResult<usize> {
        let mut file = self.file();
        let mut kept = String::new();
        let mut valid = 0usize;
        let mut removed = 0usize;
        for line in self.scan()? {
            match line {
                Line::Valid(_, raw) => {
                    kept.push_str(raw.trim());
                    kept.push('\n');
                    valid += 1;
                }
                Line::Corrupt(_) => removed += 1,
            }
        }
        if removed == 0 {
            return Ok(0);
        }

        persist::write_atomic(&self.path, kept.as_bytes())
            .map_err(|e| MemoryError::wal("repair", &self.path, e))?;
        *file = open_append(&self.path)?;
        self.entries.store(valid, Ordering::SeqCst);
        info!(path = ?self.path, removed, kept = valid, "Repaired write-ahead log");
        Ok(removed)
    }

    /// Number of valid records currently in the log.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn should_checkpoint(&self, threshold: usize) -> bool {
        self.len() >= threshold
    }

    fn scan(&self) -> MemoryResult<Vec<Line>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::wal("read", &self.path, e)),
        };

        let mut lines = Vec::new();
        for (index, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw.map_err(|e| MemoryError::wal("read", &self.path, e))?;
            let text = String::from_utf8_lossy(&raw);
            if text.trim().is_empty() {
                continue;
            }
            match WalEntry::parse_line(&text) {
                Some(entry) => lines.push(Line::Valid(entry, text.into_owned())),
                None => lines.push(Line::Corrupt(index + 1)),
            }
        }
        Ok(lines)
    }
}

fn open_append(path: &Path) -> MemoryResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MemoryError::wal("open", path, e))
}
