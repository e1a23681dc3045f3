//! Point-in-time balance snapshots used to seed future cycles.

use serde::{Deserialize, Serialize};

/// One row per (level, account), captured in bulk at designated snapshot
/// levels. Append-only: the only mutation is the subtraction of rewards
/// settled in the same block (so the snapshot reflects pre-distribution
/// balances), and deletion when the capturing block is reverted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotBalance {
    pub level: i64,
    pub account_id: i64,
    /// The baker the balances are accounted under (the account itself for
    /// baker rows).
    pub baker_id: i64,

    pub own_delegated_balance: i64,
    pub external_delegated_balance: i64,
    pub own_staked_balance: i64,
    pub external_staked_balance: i64,
    pub delegators_count: i32,
    pub stakers_count: i32,
    /// Pseudotokens issued by the baker (baker rows only).
    pub issued_pseudotokens: i64,
    /// Pseudotokens held by the account (staker rows only).
    pub staked_pseudotokens: i64,
}

impl SnapshotBalance {
    /// Whether this row describes the baker itself rather than a delegator.
    pub fn is_baker_row(&self) -> bool {
        self.account_id == self.baker_id
    }
}
