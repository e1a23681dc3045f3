//! Cursor persistence — resuming the sync after a restart.
//!
//! A cursor stores the last successfully committed level and block hash
//! together with the serialized counter state. On restart the syncer resumes
//! from the cursor instead of replaying the chain from scratch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stakeindex_core::{AppState, SyncError};

/// A persisted sync cursor for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Chain slug (e.g. `"mainnet"`).
    pub chain_id: String,
    /// Last successfully committed level.
    pub level: i64,
    /// Hash of the last committed block.
    pub block_hash: String,
    /// Cycle of the last committed level.
    pub cycle: i64,
    /// Counter state at the cursor, serialized as JSON.
    pub state_json: String,
    /// Unix timestamp of when this cursor was saved.
    pub updated_at: i64,
}

impl SyncCursor {
    /// Build a cursor from the live counter state.
    pub fn from_state(chain_id: impl Into<String>, state: &AppState) -> Result<Self, SyncError> {
        let state_json =
            serde_json::to_string(state).map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(Self {
            chain_id: chain_id.into(),
            level: state.level,
            block_hash: state.block_hash.clone(),
            cycle: state.cycle,
            state_json,
            updated_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Deserialize the counter state stored in the cursor.
    pub fn state(&self) -> Result<AppState, SyncError> {
        serde_json::from_str(&self.state_json).map_err(|e| SyncError::Storage(e.to_string()))
    }
}

/// Trait for storing and loading sync cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the latest cursor for a chain.
    async fn load(&self, chain_id: &str) -> Result<Option<SyncCursor>, SyncError>;

    /// Save (upsert) a cursor.
    async fn save(&self, cursor: SyncCursor) -> Result<(), SyncError>;

    /// Delete a cursor (e.g. when resetting the index).
    async fn delete(&self, chain_id: &str) -> Result<(), SyncError>;
}

/// Manages cursor reads/writes for a syncer.
pub struct CursorManager {
    store: Box<dyn CursorStore>,
    chain_id: String,
    /// How often to save (every N blocks).
    save_interval: u64,
    /// Block counter since last save.
    counter: u64,
}

impl CursorManager {
    pub fn new(
        store: Box<dyn CursorStore>,
        chain_id: impl Into<String>,
        save_interval: u64,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            save_interval,
            counter: 0,
        }
    }

    /// Load the saved cursor (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<SyncCursor>, SyncError> {
        self.store.load(&self.chain_id).await
    }

    /// Conditionally save a cursor every `save_interval` blocks.
    ///
    /// Call this after each block is successfully committed.
    pub async fn maybe_save(&mut self, state: &AppState) -> Result<(), SyncError> {
        self.counter += 1;
        if self.counter >= self.save_interval {
            self.force_save(state).await?;
            self.counter = 0;
        }
        Ok(())
    }

    /// Immediately save a cursor (used on shutdown and after reverts).
    pub async fn force_save(&self, state: &AppState) -> Result<(), SyncError> {
        let cursor = SyncCursor::from_state(self.chain_id.clone(), state)?;
        self.store.save(cursor).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory cursor store for tests and ephemeral syncers.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<String, SyncCursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, chain_id: &str) -> Result<Option<SyncCursor>, SyncError> {
        Ok(self.data.lock().unwrap().get(chain_id).cloned())
    }

    async fn save(&self, cursor: SyncCursor) -> Result<(), SyncError> {
        self.data.lock().unwrap().insert(cursor.chain_id.clone(), cursor);
        Ok(())
    }

    async fn delete(&self, chain_id: &str) -> Result<(), SyncError> {
        self.data.lock().unwrap().remove(chain_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(level: i64) -> AppState {
        AppState {
            level,
            cycle: level / 8,
            block_hash: format!("B{level}"),
            blocks_count: level,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = Box::new(MemoryCursorStore::new());
        let mut mgr = CursorManager::new(store, "mainnet", 10);

        // No cursor initially
        assert!(mgr.load().await.unwrap().is_none());

        mgr.force_save(&state_at(1000)).await.unwrap();

        let cursor = mgr.load().await.unwrap().unwrap();
        assert_eq!(cursor.level, 1000);
        assert_eq!(cursor.block_hash, "B1000");
        assert_eq!(cursor.chain_id, "mainnet");
        assert_eq!(cursor.state().unwrap(), state_at(1000));
    }

    #[tokio::test]
    async fn cursor_save_interval() {
        let store = Box::new(MemoryCursorStore::new());
        let mut mgr = CursorManager::new(store, "mainnet", 5);

        // Four blocks: nothing saved yet
        for i in 1..=4 {
            mgr.maybe_save(&state_at(i)).await.unwrap();
        }
        assert!(mgr.load().await.unwrap().is_none());

        // Fifth block saves
        mgr.maybe_save(&state_at(5)).await.unwrap();
        let cursor = mgr.load().await.unwrap().unwrap();
        assert_eq!(cursor.level, 5);
    }
}
