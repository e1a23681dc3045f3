//! stakeindex-core — data model and session state for the sync core.
//!
//! # Architecture
//!
//! ```text
//! Syncer (stakeindex-sync)
//!     ├── SyncSession      (entity caches + AppState cursor, this crate)
//!     ├── UpdateTrail      (typed balance-update audit trail, this crate)
//!     ├── CommitSet        (versioned commit handlers)
//!     └── NodeRpc          (stakeindex-rpc)
//! ```
//!
//! Everything here is deliberately free of I/O: rows, the balance-update IR,
//! and the session the commits mutate. The sync loop and RPC live in the
//! sibling crates.

pub mod app_state;
pub mod balance_update;
pub mod error;
pub mod model;
pub mod session;

pub use app_state::{AppState, Statistics};
pub use balance_update::{
    BalanceUpdate, Staker, UpdateCategory, UpdateKind, UpdateOrigin, UpdateTrail,
};
pub use error::SyncError;
pub use session::SyncSession;
