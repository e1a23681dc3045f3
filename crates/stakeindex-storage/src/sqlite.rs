//! SQLite cursor store for StakeIndex.
//!
//! Persists sync cursors to a single SQLite file. Uses `sqlx` with WAL mode
//! for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use stakeindex_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./stakeindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use stakeindex_core::SyncError;

use crate::cursor::{CursorStore, SyncCursor};

/// SQLite-backed cursor store.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./stakeindex.db"`) or a full
    /// SQLite URL (`"sqlite:./stakeindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), SyncError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_cursors (
                chain_id   TEXT    NOT NULL,
                level      INTEGER NOT NULL,
                block_hash TEXT    NOT NULL,
                cycle      INTEGER NOT NULL,
                state_json TEXT    NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (chain_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, chain_id: &str) -> Result<Option<SyncCursor>, SyncError> {
        let row = sqlx::query(
            "SELECT chain_id, level, block_hash, cycle, state_json, updated_at
             FROM sync_cursors WHERE chain_id = ?",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(row.map(|r| SyncCursor {
            chain_id: r.get("chain_id"),
            level: r.get("level"),
            block_hash: r.get("block_hash"),
            cycle: r.get("cycle"),
            state_json: r.get("state_json"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, cursor: SyncCursor) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_cursors
             (chain_id, level, block_hash, cycle, state_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&cursor.chain_id)
        .bind(cursor.level)
        .bind(&cursor.block_hash)
        .bind(cursor.cycle)
        .bind(&cursor.state_json)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        debug!(
            chain_id = %cursor.chain_id,
            level = cursor.level,
            "cursor saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_cursors WHERE chain_id = ?")
            .bind(chain_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
