//! Per-(cycle, baker) expectation bookkeeping.
//!
//! Two responsibilities with mirrored inverses:
//! - settlement, every block: consume the level's baking right and the
//!   previous level's attesting rights against what actually happened;
//! - bootstrap, at cycle begin: create the future cycle's rows in bulk from
//!   the snapshot, the selected stakes, and the fetched rights.

use std::collections::HashMap;

use stakeindex_core::model::{AttestingRight, BakerCycle, BakingRight, SnapshotBalance};
use stakeindex_core::{SyncError, SyncSession};

use crate::commits::{BakerCycleCommit, StakeSelection};
use crate::data::BlockData;

pub struct BakerCycleCommitV1;

impl BakerCycleCommit for BakerCycleCommitV1 {
    fn apply_settlement(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
    ) -> Result<(), SyncError> {
        let level = data.level();
        let block = session.block(level)?.clone();
        let cycle = block.cycle;

        // Baking: the round-0 right holder either produced the block or
        // missed it.
        let expected_baker = session
            .baking_rights
            .get(&cycle)
            .and_then(|rights| rights.iter().find(|r| r.level == level))
            .map(|r| r.baker_id);
        if let Some(baker_id) = expected_baker {
            let max_reward = session.cycles.get(&cycle).map(|c| c.max_block_reward).unwrap_or(0);
            if let Some(bc) = session.baker_cycle_mut(cycle, baker_id) {
                bc.future_blocks -= 1;
                bc.future_block_rewards -= max_reward;
                if baker_id != block.producer_id {
                    bc.missed_blocks += 1;
                    bc.missed_block_rewards += max_reward;
                }
            }
        }

        if let Some(bc) = session.baker_cycle_mut(cycle, block.producer_id) {
            bc.blocks += 1;
            bc.block_reward_delegated += block.bonus_delegated;
            bc.block_reward_staked_own += block.bonus_staked_own;
            bc.block_reward_staked_edge += block.bonus_staked_edge;
            bc.block_reward_staked_shared += block.bonus_staked_shared;
        }
        if let Some(bc) = session.baker_cycle_mut(cycle, block.proposer_id) {
            bc.block_reward_delegated += block.reward_delegated;
            bc.block_reward_staked_own += block.reward_staked_own;
            bc.block_reward_staked_edge += block.reward_staked_edge;
            bc.block_reward_staked_shared += block.reward_staked_shared;
            bc.block_fees += block.fees;
        }

        // Attesting: this block's metadata reports the outcome for the
        // previous level.
        if level > 1 {
            let prev = level - 1;
            let prev_cycle = session.protocol_for_level(prev)?.cycle_of(prev);
            let rights: Vec<AttestingRight> = session
                .attesting_rights
                .get(&prev_cycle)
                .map(|rights| rights.iter().filter(|r| r.level == prev).cloned().collect())
                .unwrap_or_default();
            for right in rights {
                let attested = block
                    .attestations
                    .iter()
                    .find(|(id, _)| *id == right.baker_id)
                    .map(|(_, slots)| *slots);
                if let Some(slots) = attested {
                    if slots != right.slots {
                        return Err(SyncError::integrity(
                            level,
                            format!(
                                "baker {} attested {slots} slots against a right for {}",
                                right.baker_id, right.slots
                            ),
                        ));
                    }
                }
                if let Some(bc) = session.baker_cycle_mut(prev_cycle, right.baker_id) {
                    bc.future_attestations -= right.slots as i32;
                    if attested.is_some() {
                        bc.attestations += right.slots as i32;
                    } else {
                        bc.missed_attestations += right.slots as i32;
                    }
                }
            }
        }
        Ok(())
    }

    fn revert_settlement(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let block = session.block(level)?.clone();
        let cycle = block.cycle;

        if level > 1 {
            let prev = level - 1;
            let prev_cycle = session.protocol_for_level(prev)?.cycle_of(prev);
            let rights: Vec<AttestingRight> = session
                .attesting_rights
                .get(&prev_cycle)
                .map(|rights| rights.iter().filter(|r| r.level == prev).cloned().collect())
                .unwrap_or_default();
            for right in rights.into_iter().rev() {
                let attested = block
                    .attestations
                    .iter()
                    .any(|(id, _)| *id == right.baker_id);
                if let Some(bc) = session.baker_cycle_mut(prev_cycle, right.baker_id) {
                    bc.future_attestations += right.slots as i32;
                    if attested {
                        bc.attestations -= right.slots as i32;
                    } else {
                        bc.missed_attestations -= right.slots as i32;
                    }
                }
            }
        }

        if let Some(bc) = session.baker_cycle_mut(cycle, block.proposer_id) {
            bc.block_reward_delegated -= block.reward_delegated;
            bc.block_reward_staked_own -= block.reward_staked_own;
            bc.block_reward_staked_edge -= block.reward_staked_edge;
            bc.block_reward_staked_shared -= block.reward_staked_shared;
            bc.block_fees -= block.fees;
        }
        if let Some(bc) = session.baker_cycle_mut(cycle, block.producer_id) {
            bc.blocks -= 1;
            bc.block_reward_delegated -= block.bonus_delegated;
            bc.block_reward_staked_own -= block.bonus_staked_own;
            bc.block_reward_staked_edge -= block.bonus_staked_edge;
            bc.block_reward_staked_shared -= block.bonus_staked_shared;
        }

        let expected_baker = session
            .baking_rights
            .get(&cycle)
            .and_then(|rights| rights.iter().find(|r| r.level == level))
            .map(|r| r.baker_id);
        if let Some(baker_id) = expected_baker {
            let max_reward = session.cycles.get(&cycle).map(|c| c.max_block_reward).unwrap_or(0);
            if let Some(bc) = session.baker_cycle_mut(cycle, baker_id) {
                bc.future_blocks += 1;
                bc.future_block_rewards += max_reward;
                if baker_id != block.producer_id {
                    bc.missed_blocks -= 1;
                    bc.missed_block_rewards -= max_reward;
                }
            }
        }
        Ok(())
    }

    fn apply_bootstrap(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        stakes: &dyn StakeSelection,
    ) -> Result<(), SyncError> {
        let level = data.level();
        let block = session.block(level)?.clone();
        let proto = session.protocol_by_code(block.proto_code, level)?.clone();
        let future = block.cycle + proto.consensus_rights_delay;
        let cyc = session.cycle(future)?.clone();

        // Resolve rights to account ids and store them for settlement.
        let mut baking = Vec::with_capacity(data.future_baking_rights.len());
        for r in &data.future_baking_rights {
            let baker_id = session.resolve_account(&r.delegate);
            baking.push(BakingRight {
                level: r.level,
                round: r.round,
                baker_id,
            });
        }
        let mut attesting = Vec::new();
        for r in &data.future_attesting_rights {
            for d in &r.delegates {
                let baker_id = session.resolve_account(&d.delegate);
                attesting.push(AttestingRight {
                    level: r.level,
                    baker_id,
                    slots: d.attestation_power,
                });
            }
        }

        let mut blocks_per_baker: HashMap<i64, i32> = HashMap::new();
        for r in &baking {
            *blocks_per_baker.entry(r.baker_id).or_default() += 1;
        }
        let mut slots_per_baker: HashMap<i64, i64> = HashMap::new();
        for r in &attesting {
            *slots_per_baker.entry(r.baker_id).or_default() += r.slots;
        }

        session.baking_rights.insert(future, baking);
        session.attesting_rights.insert(future, attesting);

        // One row per selected baker, from the previous cycle-end snapshot.
        let snapshot_level = level - 1;
        let baker_snaps: Vec<SnapshotBalance> = session
            .snapshots
            .range((snapshot_level, i64::MIN)..=(snapshot_level, i64::MAX))
            .map(|(_, s)| s.clone())
            .filter(SnapshotBalance::is_baker_row)
            .collect();
        for snap in baker_snaps {
            let power = stakes.baking_power(
                &proto,
                snap.own_staked_balance,
                snap.external_staked_balance,
                snap.own_delegated_balance,
                snap.external_delegated_balance,
            );
            if power == 0 {
                continue;
            }
            let share = power as f64 / cyc.total_baking_power as f64;
            let future_blocks = blocks_per_baker.get(&snap.account_id).copied().unwrap_or(0);
            let future_attestations =
                slots_per_baker.get(&snap.account_id).copied().unwrap_or(0);
            session.baker_cycles.insert(
                (future, snap.account_id),
                BakerCycle {
                    cycle: future,
                    baker_id: snap.account_id,
                    own_delegated_balance: snap.own_delegated_balance,
                    external_delegated_balance: snap.external_delegated_balance,
                    own_staked_balance: snap.own_staked_balance,
                    external_staked_balance: snap.external_staked_balance,
                    delegators_count: snap.delegators_count,
                    stakers_count: snap.stakers_count,
                    baking_power: power,
                    total_baking_power: cyc.total_baking_power,
                    expected_blocks: proto.blocks_per_cycle as f64 * share,
                    expected_attestations: proto.slots_per_cycle() as f64 * share,
                    future_blocks,
                    future_block_rewards: future_blocks as i64 * cyc.max_block_reward,
                    future_attestations: future_attestations as i32,
                    future_attestation_rewards: future_attestations
                        * cyc.attestation_reward_per_slot,
                    ..BakerCycle::new(future, snap.account_id)
                },
            );
        }
        Ok(())
    }

    fn revert_bootstrap(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let block = session.block(level)?.clone();
        let proto = session.protocol_by_code(block.proto_code, level)?;
        let future = block.cycle + proto.consensus_rights_delay;

        let keys: Vec<(i64, i64)> = session
            .baker_cycles
            .range((future, i64::MIN)..=(future, i64::MAX))
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            session.baker_cycles.remove(&key);
        }
        session.baking_rights.remove(&future);
        session.attesting_rights.remove(&future);
        Ok(())
    }
}
