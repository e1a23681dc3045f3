//! Per-(cycle, baker) expectations and realized outcomes.

use serde::{Deserialize, Serialize};

/// One row per (cycle, baker), created in bulk when the cycle's rights are
/// assigned and consumed as the cycle plays out: `future_*` fields are
/// decremented toward zero while the realized fields accumulate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BakerCycle {
    pub cycle: i64,
    pub baker_id: i64,

    // Snapshot-derived stake composition.
    pub own_delegated_balance: i64,
    pub external_delegated_balance: i64,
    pub own_staked_balance: i64,
    pub external_staked_balance: i64,
    pub delegators_count: i32,
    pub stakers_count: i32,
    pub baking_power: i64,
    pub total_baking_power: i64,

    // Statistical expectations from baking-power share.
    pub expected_blocks: f64,
    pub expected_attestations: f64,

    // Remaining expectations, consumed per block.
    pub future_blocks: i32,
    pub future_block_rewards: i64,
    pub future_attestations: i32,
    pub future_attestation_rewards: i64,

    // Realized outcomes.
    pub blocks: i32,
    pub missed_blocks: i32,
    pub attestations: i32,
    pub missed_attestations: i32,

    pub block_reward_delegated: i64,
    pub block_reward_staked_own: i64,
    pub block_reward_staked_edge: i64,
    pub block_reward_staked_shared: i64,
    pub missed_block_rewards: i64,

    pub attestation_reward_delegated: i64,
    pub attestation_reward_staked_own: i64,
    pub attestation_reward_staked_edge: i64,
    pub attestation_reward_staked_shared: i64,
    pub missed_attestation_rewards: i64,

    pub block_fees: i64,

    pub double_baking_rewards: i64,
    pub double_baking_losses: i64,
    pub double_attesting_rewards: i64,
    pub double_attesting_losses: i64,
    pub double_preattesting_rewards: i64,
    pub double_preattesting_losses: i64,
    pub nonce_revelation_rewards: i64,
    pub vdf_revelation_rewards: i64,
}

impl BakerCycle {
    pub fn new(cycle: i64, baker_id: i64) -> Self {
        Self {
            cycle,
            baker_id,
            ..Default::default()
        }
    }
}
