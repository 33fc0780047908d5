//! # Vigil Memory
//!
//! Durable memory for the coordination core:
//!
//! - **[WriteAheadLog]**: fsynced newline-delimited JSON intent log with replay,
//!   verification and repair
//! - **[MemoryStore]**: short-term and long-term collections with dirty-flag
//!   batched atomic commits, WAL recovery on open, checkpoints and snapshots
//! - **[KnowledgeStore]**: SQLite knowledge records keyed by content hash with
//!   idempotent upsert
//!
//! ## Example
//!
//! ```rust
//! use vigil_core::system_clock;
//! use vigil_memory::{MemoryConfig, MemoryItem, MemoryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let store = MemoryStore::open(MemoryConfig::new(dir.path()), system_clock())?;
//!
//! store.push_short_term(MemoryItem::new("user prefers mornings", "chat", chrono::Utc::now()))?;
//! store.add_knowledge("prefers mornings", "preference", "chat", 0.7)?;
//! store.checkpoint()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod item;
pub mod knowledge;
mod persist;
pub mod snapshot;
pub mod store;
pub mod wal;

pub use error::{MemoryError, MemoryResult};
pub use item::MemoryItem;
pub use knowledge::{KnowledgeRecord, KnowledgeStore, NewKnowledge, Upsert, content_hash};
pub use snapshot::MemorySnapshot;
pub use store::{LONG_TERM_FILE, MemoryConfig, MemoryStore, SHORT_TERM_FILE, ops};
pub use wal::{WalEntry, WalVerification, WriteAheadLog};
