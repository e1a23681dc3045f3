//! The sync cursor and global counters.

use serde::{Deserialize, Serialize};

/// Process-wide cursor and id counters, owned by the sync session (not a
/// singleton) so isolated sessions can run side by side in tests.
///
/// Every counter strictly increases on apply and strictly decreases by the
/// same amount on revert; this symmetry is a global invariant the tests pin
/// down.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppState {
    /// Last committed level.
    pub level: i64,
    /// Cycle of the last committed level.
    pub cycle: i64,
    pub block_hash: String,

    pub blocks_count: i64,
    pub next_account_id: i64,
    pub next_operation_id: i64,
    /// Also the next ledger sequence id.
    pub staking_updates_count: i64,

    pub autostaking_ops_count: i64,
    pub attestation_reward_ops_count: i64,
    pub double_signing_ops_count: i64,
    pub nonce_revelation_ops_count: i64,
    pub vdf_revelation_ops_count: i64,
}

/// Global economic statistics, updated alongside the counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Value minted by rewards and subsidies.
    pub total_created: i64,
    /// Value destroyed by burns and slashing.
    pub total_burned: i64,
    /// Value currently frozen (staked).
    pub total_frozen: i64,
}
