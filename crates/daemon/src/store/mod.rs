//! Durable relational state.
//!
//! A single SQLite file opened with WAL journaling and enforced foreign keys.
//! Writes are serialized by SQLite; readers use snapshot semantics. All
//! cross-entity access goes through the methods here, never through in-memory
//! object graphs.

mod encoding_log;
mod exclusions;
mod files;
mod libraries;
mod migrations;
mod settings;
mod stats;

pub use encoding_log::EncodingLogEntry;
pub use files::{FileRecord, FileStatus, NewFile, StatusCounts};
pub use libraries::{Library, NewLibrary, UpdateLibrary};
pub use stats::{DailyStats, HourlyStats, StatsDelta, StatsTotals};

use crate::error::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;

/// Handle to the daemon's database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    async fn new(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        migrations::run(&store.pool).await?;
        Ok(store)
    }

    /// Open (creating if missing) the database at the given path and run
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::new(options, MAX_CONNECTIONS).await
    }

    /// In-memory database for tests. Limited to one connection so every
    /// query sees the same data.
    pub async fn open_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        Self::new(options, 1).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(1500))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. The store must not be used afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
