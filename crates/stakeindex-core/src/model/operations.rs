//! Aggregated per-block economic operation rows.

use serde::{Deserialize, Serialize};

/// Autostaking action recorded on an [`AutostakingOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingAction {
    Stake,
    Unstake,
    Finalize,
    Restake,
}

impl StakingAction {
    /// Priority used when one baker shows more than one action kind in a
    /// single block: stake > unstake > finalize > restake.
    pub fn priority(self) -> u8 {
        match self {
            Self::Stake => 3,
            Self::Unstake => 2,
            Self::Finalize => 1,
            Self::Restake => 0,
        }
    }
}

/// One row per baker per block aggregating its protocol-automated staking
/// movements; the individual movements live in the staking-update ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutostakingOperation {
    pub id: i64,
    pub level: i64,
    pub baker_id: i64,
    pub action: StakingAction,
    pub amount: i64,
    pub staking_updates_count: i32,
}

/// Cycle-end settlement of one baker's attestation reward expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationRewardOperation {
    pub id: i64,
    pub level: i64,
    pub baker_id: i64,
    /// The `future_attestation_rewards` value this settlement consumed;
    /// restored verbatim on revert.
    pub expected: i64,
    pub reward_delegated: i64,
    pub reward_staked_own: i64,
    pub reward_staked_edge: i64,
    pub reward_staked_shared: i64,
    /// Full expectation burned when the rewards were missed.
    pub lost: i64,
}

impl AttestationRewardOperation {
    pub fn distributed(&self) -> i64 {
        self.reward_delegated
            + self.reward_staked_own
            + self.reward_staked_edge
            + self.reward_staked_shared
    }
}

/// The accusation flavor of a double-signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoubleSigningKind {
    Baking,
    Attesting,
    Preattesting,
}

/// One row per accusation. Created when the evidence is included in a block;
/// the slashing fields are filled in at the cycle-end the penalty resolves,
/// and zeroed again if that settlement is reverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleSigningOperation {
    pub id: i64,
    /// Level of the block that included the evidence.
    pub level: i64,
    pub kind: DoubleSigningKind,
    pub op_hash: String,
    /// Level of the offending double-signed block/attestation.
    pub accused_level: i64,
    pub accuser_id: i64,
    pub offender_id: i64,

    /// Level of the cycle-end block that settled the penalty.
    pub slashed_level: Option<i64>,
    pub reward: i64,
    pub lost_staked: i64,
    pub lost_unstaked: i64,
    pub lost_external_staked: i64,
    pub lost_external_unstaked: i64,
    pub staking_updates_count: i32,
}

impl DoubleSigningOperation {
    pub fn total_lost(&self) -> i64 {
        self.lost_staked + self.lost_unstaked + self.lost_external_staked
            + self.lost_external_unstaked
    }

    /// Value destroyed (total slashed minus the accuser's cut).
    pub fn burned(&self) -> i64 {
        self.total_lost() - self.reward
    }
}

/// Seed-nonce revelation reward, credited to the including block's producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceRevelationOperation {
    pub id: i64,
    pub level: i64,
    pub baker_id: i64,
    pub revealed_level: i64,
    pub reward_delegated: i64,
    pub reward_staked_own: i64,
    pub reward_staked_edge: i64,
    pub reward_staked_shared: i64,
}

/// VDF revelation reward, credited to the including block's producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdfRevelationOperation {
    pub id: i64,
    pub level: i64,
    pub baker_id: i64,
    pub reward_delegated: i64,
    pub reward_staked_own: i64,
    pub reward_staked_edge: i64,
    pub reward_staked_shared: i64,
}
