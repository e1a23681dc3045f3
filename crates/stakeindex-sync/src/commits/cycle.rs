//! Cycle-begin bootstrap of the future cycle row, and the stake-selection
//! formulas the protocol versions disagree on.
//!
//! At the first level of cycle `c` the protocol assigns rights for cycle
//! `c + consensus_rights_delay`, drawn from the balance snapshot taken at
//! the previous cycle's last level. The row freezes that cycle's issuance
//! parameters; it is never mutated afterward.

use stakeindex_core::model::{Cycle, Protocol};
use stakeindex_core::{SyncError, SyncSession};

use crate::commits::{CycleCommit, StakeSelection};
use crate::data::BlockData;

// ─── Stake selection ──────────────────────────────────────────────────────────

fn delegation_capped_power(
    proto: &Protocol,
    frozen: i64,
    own_delegated: i64,
    external_delegated: i64,
) -> i64 {
    let delegated = own_delegated + external_delegated;
    frozen + delegated.min(frozen * proto.max_delegated_over_frozen)
}

/// Original selection: all frozen stake counts, delegation capped by the
/// frozen multiple.
pub struct StakeSelectionV1;

impl StakeSelection for StakeSelectionV1 {
    fn baking_power(
        &self,
        proto: &Protocol,
        own_staked: i64,
        external_staked: i64,
        own_delegated: i64,
        external_delegated: i64,
    ) -> i64 {
        if own_staked < proto.minimal_frozen_stake {
            return 0;
        }
        let frozen = own_staked + external_staked;
        let power = delegation_capped_power(proto, frozen, own_delegated, external_delegated);
        if power < proto.minimal_stake {
            return 0;
        }
        power
    }
}

/// Adds the external-over-own cap: pooled stake beyond the allowed multiple
/// of the baker's own frozen stake stops counting.
pub struct StakeSelectionV2;

impl StakeSelection for StakeSelectionV2 {
    fn baking_power(
        &self,
        proto: &Protocol,
        own_staked: i64,
        external_staked: i64,
        own_delegated: i64,
        external_delegated: i64,
    ) -> i64 {
        if own_staked < proto.minimal_frozen_stake {
            return 0;
        }
        let counted_external = external_staked.min(own_staked * proto.max_external_over_own);
        let frozen = own_staked + counted_external;
        let power = delegation_capped_power(proto, frozen, own_delegated, external_delegated);
        if power < proto.minimal_stake {
            return 0;
        }
        power
    }
}

// ─── Cycle commit ─────────────────────────────────────────────────────────────

pub struct CycleCommitV1;

impl CycleCommit for CycleCommitV1 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        stakes: &dyn StakeSelection,
    ) -> Result<(), SyncError> {
        let level = data.level();
        let block = session.block(level)?.clone();
        let proto = session.protocol_by_code(block.proto_code, level)?.clone();
        let future = block.cycle + proto.consensus_rights_delay;

        let issuance = data.issuance()?;
        if issuance.cycle != future {
            return Err(SyncError::integrity(
                level,
                format!("issuance for cycle {} while bootstrapping {future}", issuance.cycle),
            ));
        }

        // Selected stakes from the snapshot at the previous cycle's end.
        let snapshot_level = level - 1;
        let mut total_bakers = 0;
        let mut total_baking_power = 0;
        for snap in session
            .snapshots
            .range((snapshot_level, i64::MIN)..=(snapshot_level, i64::MAX))
            .map(|(_, s)| s)
            .filter(|s| s.is_baker_row())
        {
            let power = stakes.baking_power(
                &proto,
                snap.own_staked_balance,
                snap.external_staked_balance,
                snap.own_delegated_balance,
                snap.external_delegated_balance,
            );
            if power > 0 {
                total_bakers += 1;
                total_baking_power += power;
            }
        }

        let max_block_reward = issuance.block_reward
            + issuance.bonus_per_slot * (proto.attesters_per_block - proto.consensus_threshold);

        session.cycles.insert(
            future,
            Cycle {
                index: future,
                first_level: proto.cycle_start(future),
                last_level: proto.cycle_end(future),
                snapshot_level,
                total_bakers,
                total_baking_power,
                block_reward: issuance.block_reward,
                block_bonus_per_slot: issuance.bonus_per_slot,
                max_block_reward,
                attestation_reward_per_slot: issuance.attestation_reward_per_slot,
                nonce_revelation_reward: issuance.nonce_revelation_reward,
                vdf_revelation_reward: issuance.vdf_revelation_reward,
                subsidy: issuance.subsidy,
            },
        );
        Ok(())
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let block = session.block(level)?.clone();
        let proto = session.protocol_by_code(block.proto_code, level)?;
        let future = block.cycle + proto.consensus_rights_delay;
        session
            .cycles
            .remove(&future)
            .ok_or_else(|| SyncError::revert(level, format!("cycle {future} row not found")))?;
        Ok(())
    }
}
