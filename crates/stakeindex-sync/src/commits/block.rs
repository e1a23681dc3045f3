//! The block commit: header row, event flags, per-block rewards, included
//! operations, and baker activity bookkeeping.
//!
//! Runs first on apply. Everything revert needs — the reward split, the
//! overwritten deactivation levels, the created accounts — is stored on the
//! block row, so revert never consults the node.

use stakeindex_core::model::{
    Block, BlockEvents, DoubleSigningKind, DoubleSigningOperation, NonceRevelationOperation,
    VdfRevelationOperation,
};
use stakeindex_core::{
    SyncError, SyncSession, UpdateCategory, UpdateKind, UpdateOrigin, UpdateTrail,
};
use stakeindex_rpc::RawOperationContents;

use crate::commits::{
    consume_fees, consume_reward, credit_destinations, debit_destinations, BlockCommit,
    RewardDestinations, RewardOutcome,
};
use crate::data::BlockData;

/// Decode the consensus round from the big-endian fitness tail.
fn parse_round(fitness: &[String], level: i64) -> Result<i32, SyncError> {
    let tail = match fitness.last() {
        Some(t) => t.trim_start_matches("0x"),
        None => return Ok(0),
    };
    if tail.is_empty() {
        return Ok(0);
    }
    u32::from_str_radix(tail, 16)
        .map(|r| r as i32)
        .map_err(|_| SyncError::integrity(level, format!("malformed fitness tail {tail:?}")))
}

/// Consume a per-block subsidy pair (mint + contract credit), if present.
fn consume_subsidy(
    trail: &mut UpdateTrail,
    level: i64,
) -> Result<Option<(String, i64)>, SyncError> {
    let mint_idx = match (0..trail.len()).find(|&i| {
        !trail.is_consumed(i) && {
            let u = trail.get(i);
            u.kind == UpdateKind::Minted
                && u.category == Some(UpdateCategory::Subsidy)
                && u.origin == UpdateOrigin::Subsidy
        }
    }) {
        Some(i) => i,
        None => return Ok(None),
    };

    let amount = -trail.get(mint_idx).change;
    if amount <= 0 {
        return Err(SyncError::integrity(level, "subsidy mint with non-negative change"));
    }
    trail.consume(mint_idx);

    let i = trail
        .next_unconsumed(mint_idx + 1)
        .ok_or_else(|| SyncError::integrity(level, "subsidy mint without recipient"))?;
    let u = trail.get(i).clone();
    if u.kind != UpdateKind::Contract || u.change != amount {
        return Err(SyncError::integrity(level, "subsidy credit does not match its mint"));
    }
    let recipient = u
        .contract
        .ok_or_else(|| SyncError::integrity(level, "subsidy credit without address"))?;
    trail.consume(i);
    Ok(Some((recipient, amount)))
}

pub struct BlockCommitV1;

impl BlockCommit for BlockCommitV1 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError> {
        let raw = &data.raw;
        let level = raw.header.level;
        let proto = session.protocol_by_code(raw.header.proto, level)?.clone();
        let cycle = proto.cycle_of(level);

        let mut events = BlockEvents::NONE;
        if proto.is_cycle_start(level) {
            events.insert(BlockEvents::CYCLE_BEGIN);
        }
        if proto.is_cycle_end(level) {
            events.insert(BlockEvents::CYCLE_END);
        }
        if level == proto.first_level {
            events.insert(BlockEvents::PROTOCOL_BEGIN);
        }
        if raw.metadata.next_protocol != raw.metadata.protocol {
            events.insert(BlockEvents::PROTOCOL_END);
        }
        if !raw.metadata.deactivated.is_empty() {
            events.insert(BlockEvents::DEACTIVATIONS);
        }
        if proto.is_snapshot_level(level) {
            events.insert(BlockEvents::BALANCE_SNAPSHOT);
        }
        if data.updates.iter().any(|u| u.is_delayed()) {
            events.insert(BlockEvents::SLASHING);
        }

        let round = parse_round(&raw.header.fitness, level)?;
        let proposer_id = session.resolve_account(&raw.metadata.proposer);
        let producer_id = session.resolve_account(&raw.metadata.baker);

        // Fees move from the accumulator to the proposer's spendable funds.
        let mut fees = 0;
        if let Some((addr, amount)) = consume_fees(trail, level)? {
            if addr != raw.metadata.proposer {
                return Err(SyncError::integrity(level, "block fees credited past the proposer"));
            }
            fees = amount;
            let proposer = session.account_mut(proposer_id)?;
            proposer.balance += amount;
            proposer.own_delegated_balance += amount;
        }

        // Base reward (proposer) and bonus (producer).
        let mut reward = RewardDestinations::default();
        if let Some((baker, amount, RewardOutcome::Paid(dest))) =
            consume_reward(trail, level, UpdateCategory::BakingRewards, None)?
        {
            if baker != raw.metadata.proposer {
                return Err(SyncError::integrity(level, "baking reward credited past the proposer"));
            }
            credit_destinations(session, proposer_id, &dest)?;
            session.statistics.total_created += amount;
            reward = dest;
        }

        let mut bonus = RewardDestinations::default();
        if let Some((baker, amount, RewardOutcome::Paid(dest))) =
            consume_reward(trail, level, UpdateCategory::BakingBonuses, None)?
        {
            if baker != raw.metadata.baker {
                return Err(SyncError::integrity(level, "baking bonus credited past the producer"));
            }
            credit_destinations(session, producer_id, &dest)?;
            session.statistics.total_created += amount;
            bonus = dest;
        }

        // Per-block subsidy, if the protocol mints one.
        let mut subsidy = 0;
        let mut subsidy_recipient_id = 0;
        if let Some((recipient, amount)) = consume_subsidy(trail, level)? {
            subsidy_recipient_id = session.resolve_account(&recipient);
            session.account_mut(subsidy_recipient_id)?.balance += amount;
            session.statistics.total_created += amount;
            subsidy = amount;
        }

        // Included anonymous operations, in three id-allocation phases so
        // revert can release ids strictly LIFO per phase.
        for op in &raw.operations {
            if let RawOperationContents::SeedNonceRevelation { revealed_level } = op.contents {
                let (baker, amount, outcome) =
                    consume_reward(trail, level, UpdateCategory::NonceRevelationRewards, None)?
                        .ok_or_else(|| {
                            SyncError::integrity(level, "nonce revelation without reward")
                        })?;
                if baker != raw.metadata.baker {
                    return Err(SyncError::integrity(
                        level,
                        "nonce revelation tip credited past the producer",
                    ));
                }
                let RewardOutcome::Paid(dest) = outcome else {
                    return Err(SyncError::integrity(level, "burned nonce revelation tip"));
                };
                credit_destinations(session, producer_id, &dest)?;
                session.statistics.total_created += amount;
                if let Some(bc) = session.baker_cycle_mut(cycle, producer_id) {
                    bc.nonce_revelation_rewards += amount;
                }
                session.account_mut(producer_id)?.nonce_revelations_count += 1;
                let id = session.next_operation_id();
                session.nonce_revelation_ops.insert(
                    id,
                    NonceRevelationOperation {
                        id,
                        level,
                        baker_id: producer_id,
                        revealed_level,
                        reward_delegated: dest.delegated,
                        reward_staked_own: dest.staked_own,
                        reward_staked_edge: dest.staked_edge,
                        reward_staked_shared: dest.staked_shared,
                    },
                );
                session.app_state.nonce_revelation_ops_count += 1;
            }
        }

        for op in &raw.operations {
            if let RawOperationContents::VdfRevelation = op.contents {
                let (baker, amount, outcome) =
                    consume_reward(trail, level, UpdateCategory::VdfRevelationRewards, None)?
                        .ok_or_else(|| {
                            SyncError::integrity(level, "vdf revelation without reward")
                        })?;
                if baker != raw.metadata.baker {
                    return Err(SyncError::integrity(
                        level,
                        "vdf revelation tip credited past the producer",
                    ));
                }
                let RewardOutcome::Paid(dest) = outcome else {
                    return Err(SyncError::integrity(level, "burned vdf revelation tip"));
                };
                credit_destinations(session, producer_id, &dest)?;
                session.statistics.total_created += amount;
                if let Some(bc) = session.baker_cycle_mut(cycle, producer_id) {
                    bc.vdf_revelation_rewards += amount;
                }
                session.account_mut(producer_id)?.vdf_revelations_count += 1;
                let id = session.next_operation_id();
                session.vdf_revelation_ops.insert(
                    id,
                    VdfRevelationOperation {
                        id,
                        level,
                        baker_id: producer_id,
                        reward_delegated: dest.delegated,
                        reward_staked_own: dest.staked_own,
                        reward_staked_edge: dest.staked_edge,
                        reward_staked_shared: dest.staked_shared,
                    },
                );
                session.app_state.vdf_revelation_ops_count += 1;
            }
        }

        for op in &raw.operations {
            let (kind, offender, accused_level) = match &op.contents {
                RawOperationContents::DoubleBakingEvidence { offender, accused_level } => {
                    (DoubleSigningKind::Baking, offender, *accused_level)
                }
                RawOperationContents::DoubleAttestationEvidence { offender, accused_level } => {
                    (DoubleSigningKind::Attesting, offender, *accused_level)
                }
                RawOperationContents::DoublePreattestationEvidence { offender, accused_level } => {
                    (DoubleSigningKind::Preattesting, offender, *accused_level)
                }
                _ => continue,
            };
            let offender_id = session.resolve_account(offender);
            {
                let acc = session.account_mut(offender_id)?;
                acc.is_baker = true;
                match kind {
                    DoubleSigningKind::Baking => acc.double_baking_count += 1,
                    DoubleSigningKind::Attesting => acc.double_attesting_count += 1,
                    DoubleSigningKind::Preattesting => acc.double_preattesting_count += 1,
                }
            }
            let id = session.next_operation_id();
            session.double_signing_ops.insert(
                id,
                DoubleSigningOperation {
                    id,
                    level,
                    kind,
                    op_hash: op.hash.clone(),
                    accused_level,
                    accuser_id: producer_id,
                    offender_id,
                    slashed_level: None,
                    reward: 0,
                    lost_staked: 0,
                    lost_unstaked: 0,
                    lost_external_staked: 0,
                    lost_external_unstaked: 0,
                    staking_updates_count: 0,
                },
            );
            session.app_state.double_signing_ops_count += 1;
        }

        // Deactivations announced by the block.
        let mut deactivated = Vec::new();
        for addr in &raw.metadata.deactivated {
            let id = session.resolve_account(addr);
            let acc = session.account_mut(id)?;
            deactivated.push((id, acc.deactivation_level));
            acc.active = false;
            acc.deactivation_level = level;
        }

        // Baking activity extends the grace period.
        let grace = proto.grace_level(level);
        let mut reset_deactivations = Vec::new();
        let mut bakers = vec![proposer_id];
        if producer_id != proposer_id {
            bakers.push(producer_id);
        }
        for id in bakers {
            let acc = session.account_mut(id)?;
            acc.is_baker = true;
            if acc.deactivation_level != grace {
                reset_deactivations.push((id, acc.deactivation_level));
                acc.deactivation_level = grace;
                acc.active = true;
            }
        }

        let mut attestations = Vec::new();
        for att in &raw.metadata.attestations {
            let id = session.resolve_account(&att.delegate);
            attestations.push((id, att.slots));
        }

        session.account_mut(producer_id)?.blocks_count += 1;

        session.blocks.insert(
            level,
            Block {
                level,
                hash: raw.hash.clone(),
                predecessor: raw.header.predecessor.clone(),
                timestamp: raw.header.timestamp,
                cycle,
                proto_code: raw.header.proto,
                round,
                payload_round: raw.header.payload_round,
                proposer_id,
                producer_id,
                events,
                fees,
                reward_delegated: reward.delegated,
                reward_staked_own: reward.staked_own,
                reward_staked_edge: reward.staked_edge,
                reward_staked_shared: reward.staked_shared,
                bonus_delegated: bonus.delegated,
                bonus_staked_own: bonus.staked_own,
                bonus_staked_edge: bonus.staked_edge,
                bonus_staked_shared: bonus.staked_shared,
                subsidy,
                subsidy_recipient_id,
                attestations,
                reset_deactivations,
                deactivated,
                created_accounts: Vec::new(),
            },
        );

        session.app_state.level = level;
        session.app_state.cycle = cycle;
        session.app_state.block_hash = raw.hash.clone();
        session.app_state.blocks_count += 1;
        Ok(())
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let block = session.block(level)?.clone();

        session.account_mut(block.producer_id)?.blocks_count -= 1;

        for &(id, prev) in block.reset_deactivations.iter().rev() {
            let acc = session.account_mut(id)?;
            acc.deactivation_level = prev;
            acc.active = prev > level;
        }
        for &(id, prev) in block.deactivated.iter().rev() {
            let acc = session.account_mut(id)?;
            acc.deactivation_level = prev;
            acc.active = prev > level;
        }

        // Operation phases unwind in reverse allocation order.
        let double_ids: Vec<i64> = session
            .double_signing_ops
            .values()
            .filter(|o| o.level == level)
            .map(|o| o.id)
            .collect();
        for id in double_ids.into_iter().rev() {
            let op = session
                .double_signing_ops
                .remove(&id)
                .ok_or_else(|| SyncError::revert(level, format!("double-signing op {id} not found")))?;
            if op.slashed_level.is_some() {
                return Err(SyncError::revert(level, format!("accusation {id} is still slashed")));
            }
            let acc = session.account_mut(op.offender_id)?;
            match op.kind {
                DoubleSigningKind::Baking => acc.double_baking_count -= 1,
                DoubleSigningKind::Attesting => acc.double_attesting_count -= 1,
                DoubleSigningKind::Preattesting => acc.double_preattesting_count -= 1,
            }
            session.app_state.double_signing_ops_count -= 1;
            session.release_operation_id(id)?;
        }

        let vdf_ids: Vec<i64> = session
            .vdf_revelation_ops
            .values()
            .filter(|o| o.level == level)
            .map(|o| o.id)
            .collect();
        for id in vdf_ids.into_iter().rev() {
            let op = session
                .vdf_revelation_ops
                .remove(&id)
                .ok_or_else(|| SyncError::revert(level, format!("vdf revelation op {id} not found")))?;
            let dest = RewardDestinations {
                delegated: op.reward_delegated,
                staked_own: op.reward_staked_own,
                staked_edge: op.reward_staked_edge,
                staked_shared: op.reward_staked_shared,
            };
            debit_destinations(session, op.baker_id, &dest)?;
            session.statistics.total_created -= dest.total();
            if let Some(bc) = session.baker_cycle_mut(block.cycle, op.baker_id) {
                bc.vdf_revelation_rewards -= dest.total();
            }
            session.account_mut(op.baker_id)?.vdf_revelations_count -= 1;
            session.app_state.vdf_revelation_ops_count -= 1;
            session.release_operation_id(id)?;
        }

        let nonce_ids: Vec<i64> = session
            .nonce_revelation_ops
            .values()
            .filter(|o| o.level == level)
            .map(|o| o.id)
            .collect();
        for id in nonce_ids.into_iter().rev() {
            let op = session
                .nonce_revelation_ops
                .remove(&id)
                .ok_or_else(|| SyncError::revert(level, format!("nonce revelation op {id} not found")))?;
            let dest = RewardDestinations {
                delegated: op.reward_delegated,
                staked_own: op.reward_staked_own,
                staked_edge: op.reward_staked_edge,
                staked_shared: op.reward_staked_shared,
            };
            debit_destinations(session, op.baker_id, &dest)?;
            session.statistics.total_created -= dest.total();
            if let Some(bc) = session.baker_cycle_mut(block.cycle, op.baker_id) {
                bc.nonce_revelation_rewards -= dest.total();
            }
            session.account_mut(op.baker_id)?.nonce_revelations_count -= 1;
            session.app_state.nonce_revelation_ops_count -= 1;
            session.release_operation_id(id)?;
        }

        if block.subsidy > 0 {
            session.account_mut(block.subsidy_recipient_id)?.balance -= block.subsidy;
            session.statistics.total_created -= block.subsidy;
        }

        let bonus = RewardDestinations {
            delegated: block.bonus_delegated,
            staked_own: block.bonus_staked_own,
            staked_edge: block.bonus_staked_edge,
            staked_shared: block.bonus_staked_shared,
        };
        debit_destinations(session, block.producer_id, &bonus)?;
        session.statistics.total_created -= bonus.total();

        let reward = RewardDestinations {
            delegated: block.reward_delegated,
            staked_own: block.reward_staked_own,
            staked_edge: block.reward_staked_edge,
            staked_shared: block.reward_staked_shared,
        };
        debit_destinations(session, block.proposer_id, &reward)?;
        session.statistics.total_created -= reward.total();

        if block.fees > 0 {
            let proposer = session.account_mut(block.proposer_id)?;
            proposer.balance -= block.fees;
            proposer.own_delegated_balance -= block.fees;
        }

        let prev_cycle = if level > 1 {
            session.protocol_for_level(level - 1)?.cycle_of(level - 1)
        } else {
            0
        };
        session.blocks.remove(&level);
        session.app_state.blocks_count -= 1;
        session.app_state.level = level - 1;
        session.app_state.cycle = prev_cycle;
        session.app_state.block_hash = block.predecessor;
        Ok(())
    }
}
