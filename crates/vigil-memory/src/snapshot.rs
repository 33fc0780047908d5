//! Point-in-time snapshots of the whole memory

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};
use crate::item::MemoryItem;
use crate::knowledge::KnowledgeRecord;
use crate::persist;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub created_at: DateTime<Utc>,
    pub short_term: Vec<MemoryItem>,
    pub long_term: Vec<MemoryItem>,
    pub knowledge: Vec<KnowledgeRecord>,
}

impl MemorySnapshot {
    /// `snapshot-YYYYMMDD-HHMMSS.json`
    pub fn file_name(at: DateTime<Utc>) -> String {
        format!("snapshot-{}.json", at.format("%Y%m%d-%H%M%S"))
    }

    /// Write atomically into `dir`; returns the file path.
    pub fn write_to(&self, dir: &Path) -> MemoryResult<PathBuf> {
        let path = dir.join(Self::file_name(self.created_at));
        let bytes = serde_json::to_vec_pretty(self)?;
        persist::write_atomic(&path, &bytes)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> MemoryResult<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| MemoryError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_format() {
        let at = DateTime::parse_from_rfc3339("2025-03-09T07:05:02Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(MemorySnapshot::file_name(at), "snapshot-20250309-070502.json");
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let snapshot = MemorySnapshot {
            created_at: now,
            short_term: vec![MemoryItem::new("hello", "chat", now)],
            long_term: Vec::new(),
            knowledge: Vec::new(),
        };
        let path = snapshot.write_to(&dir.path().join("snapshots")).unwrap();
        assert_eq!(MemorySnapshot::load(&path).unwrap(), snapshot);
    }
}
