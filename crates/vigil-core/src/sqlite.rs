//! SQLite connection setup and schema migrations shared by the durable stores

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, params};

/// Per-connection tuning applied right after open.
#[derive(Debug, Clone)]
pub struct SqliteTuning {
    pub wal_mode: bool,
    pub cache_size_kb: i32,
    pub busy_timeout: Duration,
}

impl Default for SqliteTuning {
    fn default() -> Self {
        Self {
            wal_mode: true,
            cache_size_kb: 16 * 1024,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a connection with WAL journaling and the given tuning.
pub fn open_connection(path: &Path, tuning: &SqliteTuning) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, tuning)?;
    Ok(conn)
}

/// Private in-memory database, used by tests and tooling.
pub fn open_in_memory(tuning: &SqliteTuning) -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn, tuning)?;
    Ok(conn)
}

fn configure(conn: &Connection, tuning: &SqliteTuning) -> rusqlite::Result<()> {
    let mut pragmas = Vec::new();
    if tuning.wal_mode {
        pragmas.push("PRAGMA journal_mode = WAL;".to_string());
    }
    pragmas.push("PRAGMA synchronous = NORMAL;".to_string());
    pragmas.push(format!("PRAGMA cache_size = -{};", tuning.cache_size_kb));
    pragmas.push("PRAGMA foreign_keys = ON;".to_string());
    conn.execute_batch(&pragmas.join("\n"))?;
    conn.busy_timeout(tuning.busy_timeout)
}

/// Individual migration definition
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// Applies an ordered list of migrations, recording each in `schema_migrations`.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

impl MigrationEngine {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    pub fn current_version(&self, conn: &Connection) -> rusqlite::Result<u32> {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
    }

    /// Run every pending migration, each in its own transaction.
    pub fn migrate(&self, conn: &Connection) -> rusqlite::Result<u32> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;

        let current = self.current_version(conn)?;
        for migration in self.migrations.iter().filter(|m| m.version > current) {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration.up)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
                params![migration.version, migration.description],
            )?;
            tx.commit()?;
            tracing::debug!(
                version = migration.version,
                description = migration.description,
                "Applied schema migration"
            );
        }

        self.current_version(conn)
    }
}
