//! Per-cycle issuance parameters, frozen at cycle-begin.

use serde::{Deserialize, Serialize};

/// One row per cycle.
///
/// Issuance parameters are fetched once when the cycle's rights are assigned
/// and never mutated afterward; the row only disappears again if the
/// cycle-begin block that created it is reverted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cycle {
    pub index: i64,
    pub first_level: i64,
    pub last_level: i64,
    /// Level of the balance snapshot this cycle's rights were drawn from.
    pub snapshot_level: i64,

    pub total_bakers: i32,
    pub total_baking_power: i64,

    pub block_reward: i64,
    pub block_bonus_per_slot: i64,
    /// Base reward plus the maximum achievable bonus.
    pub max_block_reward: i64,
    pub attestation_reward_per_slot: i64,
    pub nonce_revelation_reward: i64,
    pub vdf_revelation_reward: i64,
    pub subsidy: i64,
}
