//! Everything one block commit needs, prefetched before any mutation.
//!
//! The prepare phase resolves every RPC dependency of a block into a
//! [`BlockData`] bundle. The commit sequence itself is then synchronous: it
//! either runs to completion against fully reconciled inputs or fails before
//! touching the session.

use std::collections::HashMap;

use stakeindex_core::{BalanceUpdate, SyncError};
use stakeindex_rpc::{
    RawAttestingRight, RawBakingRight, RawBlock, RawIssuance, RawUnstakeRequest,
    RawUnstakedDeposit,
};

/// Issuance parameters of one cycle, resolved from the node's forecast.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Issuance {
    pub cycle: i64,
    pub block_reward: i64,
    pub bonus_per_slot: i64,
    pub attestation_reward_per_slot: i64,
    pub nonce_revelation_reward: i64,
    pub vdf_revelation_reward: i64,
    pub subsidy: i64,
}

impl From<&RawIssuance> for Issuance {
    fn from(raw: &RawIssuance) -> Self {
        Self {
            cycle: raw.cycle,
            block_reward: raw.baking_reward_fixed_portion,
            bonus_per_slot: raw.baking_reward_bonus_per_slot,
            attestation_reward_per_slot: raw.attesting_reward_per_slot,
            nonce_revelation_reward: raw.seed_nonce_revelation_tip,
            vdf_revelation_reward: raw.vdf_revelation_tip,
            subsidy: raw.liquidity_baking_subsidy,
        }
    }
}

/// One block plus all its prefetched context.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub raw: RawBlock,
    /// The audit trail, already strictly parsed.
    pub updates: Vec<BalanceUpdate>,

    /// Issuance for the cycle being bootstrapped (cycle-begin blocks only).
    pub issuance: Option<Issuance>,
    /// Rights for the cycle being bootstrapped (cycle-begin blocks only).
    pub future_baking_rights: Vec<RawBakingRight>,
    pub future_attesting_rights: Vec<RawAttestingRight>,

    /// Node's per-cycle unstaked-deposit totals, by offender address
    /// (slashing blocks only).
    pub unstaked_deposits: HashMap<String, Vec<RawUnstakedDeposit>>,
    /// Node's pending unstake requests, by staker address (slashing blocks
    /// only).
    pub staker_requests: HashMap<String, Vec<RawUnstakeRequest>>,
}

impl BlockData {
    pub fn new(raw: RawBlock, updates: Vec<BalanceUpdate>) -> Self {
        Self {
            raw,
            updates,
            issuance: None,
            future_baking_rights: Vec::new(),
            future_attesting_rights: Vec::new(),
            unstaked_deposits: HashMap::new(),
            staker_requests: HashMap::new(),
        }
    }

    pub fn level(&self) -> i64 {
        self.raw.header.level
    }

    /// Issuance, required on cycle-begin blocks.
    pub fn issuance(&self) -> Result<&Issuance, SyncError> {
        self.issuance
            .as_ref()
            .ok_or_else(|| SyncError::integrity(self.level(), "issuance was not prefetched"))
    }
}
