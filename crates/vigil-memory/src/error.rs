//! Error types for the memory layer

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors that can occur in the WAL, the collection files or the knowledge store
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The write-ahead log could not be read or written
    #[error("WAL operation '{operation}' failed on {}: {source}", path.display())]
    Wal {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A collection could not be persisted; its dirty flag stays set
    #[error("Failed to commit {collection}: {reason}")]
    CommitFailed {
        collection: &'static str,
        reason: String,
    },

    /// A persisted collection exists but cannot be read
    #[error("Failed to load {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },

    /// The knowledge database rejected an operation
    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    /// A record could not be encoded or decoded
    #[error("Memory serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        MemoryError::Knowledge(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

impl MemoryError {
    pub(crate) fn wal(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        MemoryError::Wal {
            operation,
            path: path.into(),
            source,
        }
    }
}
