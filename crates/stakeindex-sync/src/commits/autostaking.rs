//! Cycle-end classification of protocol-automated staking movements.
//!
//! After rewards settle, the remaining regular-origin contract/freezer
//! entries come in adjacent pairs describing the protocol's automatic
//! restaking of each baker's funds. The pair shapes map onto four ledger
//! kinds:
//!
//! - contract debit  + deposits credit            → stake
//! - deposits debit  + unstaked-deposits credit   → unstake
//! - unstaked debit  + contract credit            → finalize
//! - unstaked debit  + deposits credit            → restake
//!
//! Any other shape is a fatal integrity violation.

use std::collections::BTreeMap;

use stakeindex_core::model::{
    AutostakingOperation, StakingAction, StakingUpdateKind, StakingUpdateSource,
};
use stakeindex_core::{
    Staker, SyncError, SyncSession, UpdateCategory, UpdateKind, UpdateOrigin, UpdateTrail,
};

use crate::commits::AutostakingCommit;
use crate::data::BlockData;
use crate::ledger;

/// One classified movement, before it becomes a ledger entry.
#[derive(Debug, Clone)]
struct Move {
    kind: StakingUpdateKind,
    action: StakingAction,
    amount: i64,
    /// Unstake-request cycle for request-flavored moves.
    cycle: Option<i64>,
}

/// The baker's own funds in either freezer position.
fn own_baker(staker: &Staker) -> Option<&str> {
    match staker {
        Staker::BakerOwn { baker } => Some(baker),
        Staker::Single { contract, delegate } if contract == delegate => Some(delegate),
        _ => None,
    }
}

/// Classify the next unclassified pair starting at `first`.
fn classify_pair(
    trail: &mut UpdateTrail,
    level: i64,
    first: usize,
) -> Result<(String, Move), SyncError> {
    let second = trail
        .next_unconsumed(first + 1)
        .ok_or_else(|| SyncError::integrity(level, "dangling autostaking update"))?;
    let a = trail.get(first).clone();
    let b = trail.get(second).clone();
    let bad = || {
        SyncError::integrity(
            level,
            format!("unrecognized autostaking pair: {a:?} / {b:?}"),
        )
    };

    let amount = -a.change;
    if amount <= 0 || b.change != amount {
        return Err(bad());
    }

    let (baker, mv) = match (a.kind, a.category, b.kind, b.category) {
        // Spendable funds frozen.
        (UpdateKind::Contract, None, UpdateKind::Freezer, Some(UpdateCategory::Deposits)) => {
            let baker = own_baker(b.staker.as_ref().ok_or_else(bad)?).ok_or_else(bad)?;
            if a.contract.as_deref() != Some(baker) {
                return Err(bad());
            }
            (
                baker.to_string(),
                Move {
                    kind: StakingUpdateKind::Stake,
                    action: StakingAction::Stake,
                    amount,
                    cycle: None,
                },
            )
        }
        // Frozen funds enter the unstake cooldown.
        (
            UpdateKind::Freezer,
            Some(UpdateCategory::Deposits),
            UpdateKind::Freezer,
            Some(UpdateCategory::UnstakedDeposits),
        ) => {
            let baker = own_baker(a.staker.as_ref().ok_or_else(bad)?).ok_or_else(bad)?;
            if own_baker(b.staker.as_ref().ok_or_else(bad)?) != Some(baker) {
                return Err(bad());
            }
            (
                baker.to_string(),
                Move {
                    kind: StakingUpdateKind::Unstake,
                    action: StakingAction::Unstake,
                    amount,
                    cycle: Some(b.cycle.ok_or_else(bad)?),
                },
            )
        }
        // Cooled-down funds paid out.
        (
            UpdateKind::Freezer,
            Some(UpdateCategory::UnstakedDeposits),
            UpdateKind::Contract,
            None,
        ) => {
            let baker = own_baker(a.staker.as_ref().ok_or_else(bad)?).ok_or_else(bad)?;
            if b.contract.as_deref() != Some(baker) {
                return Err(bad());
            }
            (
                baker.to_string(),
                Move {
                    kind: StakingUpdateKind::Finalize,
                    action: StakingAction::Finalize,
                    amount,
                    cycle: Some(a.cycle.ok_or_else(bad)?),
                },
            )
        }
        // Cooled-down funds frozen again.
        (
            UpdateKind::Freezer,
            Some(UpdateCategory::UnstakedDeposits),
            UpdateKind::Freezer,
            Some(UpdateCategory::Deposits),
        ) => {
            let baker = own_baker(a.staker.as_ref().ok_or_else(bad)?).ok_or_else(bad)?;
            if own_baker(b.staker.as_ref().ok_or_else(bad)?) != Some(baker) {
                return Err(bad());
            }
            (
                baker.to_string(),
                Move {
                    kind: StakingUpdateKind::Restake,
                    action: StakingAction::Restake,
                    amount,
                    cycle: Some(a.cycle.ok_or_else(bad)?),
                },
            )
        }
        _ => return Err(bad()),
    };

    trail.consume(first);
    trail.consume(second);
    Ok((baker, mv))
}

pub struct AutostakingCommitV1;

impl AutostakingCommit for AutostakingCommitV1 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError> {
        let level = data.level();
        let block_cycle = session.block(level)?.cycle;

        // Classify all remaining regular-origin staking movement pairs,
        // grouped per baker in trail order.
        let mut per_baker: BTreeMap<i64, Vec<Move>> = BTreeMap::new();
        loop {
            let first = match (0..trail.len()).find(|&i| {
                !trail.is_consumed(i) && {
                    let u = trail.get(i);
                    u.origin == UpdateOrigin::Block
                        && matches!(u.kind, UpdateKind::Contract | UpdateKind::Freezer)
                }
            }) {
                Some(i) => i,
                None => break,
            };
            let (baker, mv) = classify_pair(trail, level, first)?;
            let baker_id = session.resolve_account(&baker);
            per_baker.entry(baker_id).or_default().push(mv);
        }

        for (baker_id, moves) in per_baker {
            let op_id = session.next_operation_id();
            for mv in &moves {
                ledger::apply(
                    session,
                    level,
                    ledger::LedgerEntry {
                        cycle: mv.cycle.unwrap_or(block_cycle),
                        baker_id,
                        staker_id: baker_id,
                        kind: mv.kind,
                        amount: mv.amount,
                        pseudotokens: 0,
                        rounding_error: 0,
                        source: StakingUpdateSource::Autostaking(op_id),
                    },
                )?;
            }

            // Several kinds can show up for one baker in one block; the row
            // records the dominant one.
            let action = moves
                .iter()
                .map(|m| m.action)
                .max_by_key(|a| a.priority())
                .ok_or_else(|| SyncError::integrity(level, "autostaking op with no moves"))?;
            let amount = moves
                .iter()
                .filter(|m| m.action == action)
                .map(|m| m.amount)
                .sum();

            session.autostaking_ops.insert(
                op_id,
                AutostakingOperation {
                    id: op_id,
                    level,
                    baker_id,
                    action,
                    amount,
                    staking_updates_count: moves.len() as i32,
                },
            );
            session.account_mut(baker_id)?.autostaking_ops_count += 1;
            session.app_state.autostaking_ops_count += 1;
        }
        Ok(())
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let ids: Vec<i64> = session
            .autostaking_ops
            .values()
            .filter(|o| o.level == level)
            .map(|o| o.id)
            .collect();
        for id in ids.into_iter().rev() {
            let op = session
                .autostaking_ops
                .remove(&id)
                .ok_or_else(|| SyncError::revert(level, format!("autostaking op {id} not found")))?;
            ledger::revert_for_source(session, StakingUpdateSource::Autostaking(id))?;
            session.account_mut(op.baker_id)?.autostaking_ops_count -= 1;
            session.app_state.autostaking_ops_count -= 1;
            session.release_operation_id(id)?;
        }
        Ok(())
    }
}
