//! stakeindex-sync — the block state-transition engine.
//!
//! Every block is applied as an ordered sequence of commits resolved from
//! the block's protocol code, and every commit has an exact inverse so the
//! whole block can be reverted on a reorg. The commits cross-check the
//! node's balance-update trail entry by entry; a movement the model cannot
//! account for stops the sync rather than drifting.

pub mod commits;
pub mod data;
pub mod ledger;
pub mod registry;
pub mod syncer;

pub use data::{BlockData, Issuance};
pub use registry::{commit_set, CommitSet};
pub use syncer::{Syncer, SyncerConfig};
