//! stakeindex-storage — cursor persistence backends for StakeIndex.
//!
//! Backends:
//! - [`cursor::MemoryCursorStore`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

pub mod cursor;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cursor::{CursorManager, CursorStore, MemoryCursorStore, SyncCursor};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;
