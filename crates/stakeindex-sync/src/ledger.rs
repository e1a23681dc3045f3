//! The staking-update ledger: the single write path for every staking
//! balance mutation.
//!
//! Commits never touch staking balances directly. They append entries here,
//! and the entry's kind drives one forward mutation set with an exact
//! inverse. Revert pops entries strictly in LIFO order, so a reverted block
//! unwinds through the very same code path that applied it.

use stakeindex_core::model::{StakingUpdate, StakingUpdateKind, StakingUpdateSource};
use stakeindex_core::{SyncError, SyncSession};

/// A ledger entry before it is given its sequence id.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Unstake-request cycle for unstake-flavored kinds, block cycle
    /// otherwise.
    pub cycle: i64,
    pub baker_id: i64,
    pub staker_id: i64,
    pub kind: StakingUpdateKind,
    pub amount: i64,
    pub pseudotokens: i64,
    pub rounding_error: i64,
    pub source: StakingUpdateSource,
}

/// Append an entry and apply its balance effects. Returns the sequence id.
pub fn apply(session: &mut SyncSession, level: i64, entry: LedgerEntry) -> Result<i64, SyncError> {
    let id = session.app_state.staking_updates_count;
    let update = StakingUpdate {
        id,
        level,
        cycle: entry.cycle,
        baker_id: entry.baker_id,
        staker_id: entry.staker_id,
        kind: entry.kind,
        amount: entry.amount,
        pseudotokens: entry.pseudotokens,
        rounding_error: entry.rounding_error,
        source: entry.source,
    };
    mutate(session, &update, 1)?;
    session.staking_updates.insert(id, update);
    session.app_state.staking_updates_count += 1;
    Ok(id)
}

/// Undo the most recent ledger entry. Anything but strict LIFO is a revert
/// failure: it means the caller's unwind order diverged from the apply order.
pub fn revert_last(session: &mut SyncSession, id: i64) -> Result<(), SyncError> {
    if id != session.app_state.staking_updates_count - 1 {
        return Err(SyncError::revert(
            session.app_state.level,
            format!("staking update {id} is not the most recent"),
        ));
    }
    let update = session
        .staking_updates
        .remove(&id)
        .ok_or_else(|| SyncError::revert(session.app_state.level, format!("staking update {id} not found")))?;
    mutate(session, &update, -1)?;
    session.app_state.staking_updates_count -= 1;
    Ok(())
}

/// Undo every ledger entry produced by one operation, newest first.
pub fn revert_for_source(
    session: &mut SyncSession,
    source: StakingUpdateSource,
) -> Result<(), SyncError> {
    let ids: Vec<i64> = session
        .staking_updates
        .values()
        .filter(|u| u.source == source)
        .map(|u| u.id)
        .rev()
        .collect();
    for id in ids {
        revert_last(session, id)?;
    }
    Ok(())
}

/// Pseudotokens to mint for `amount` joining a pool (1:1 on an empty pool).
pub fn pseudotokens_for_stake(pool: i64, total_pt: i64, amount: i64) -> i64 {
    if total_pt == 0 || pool == 0 {
        return amount;
    }
    (amount as i128 * total_pt as i128 / pool as i128) as i64
}

/// Current value of `pt` pseudotokens against a pool.
pub fn stake_for_pseudotokens(pool: i64, total_pt: i64, pt: i64) -> i64 {
    if total_pt == 0 {
        return 0;
    }
    (pool as i128 * pt as i128 / total_pt as i128) as i64
}

/// Apply (`direction = 1`) or revert (`direction = -1`) one entry's effects.
fn mutate(session: &mut SyncSession, u: &StakingUpdate, direction: i64) -> Result<(), SyncError> {
    let amt = u.amount * direction;
    let eff = u.effective_amount() * direction;
    let re = u.rounding_error * direction;
    let pt = u.pseudotokens * direction;
    let own = u.is_own();
    let count = direction as i32;

    match u.kind {
        StakingUpdateKind::Stake => {
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.own_delegated_balance -= amt;
                baker.own_staked_balance += amt;
            } else {
                let staker = session.account_mut(u.staker_id)?;
                staker.balance -= amt;
                staker.staked_pseudotokens += pt;
                let baker = session.account_mut(u.baker_id)?;
                baker.external_staked_balance += amt;
                baker.issued_pseudotokens += pt;
            }
            session.statistics.total_frozen += amt;
        }
        StakingUpdateKind::Unstake => {
            {
                let req = session.unstake_request_mut(u.baker_id, u.staker_id, u.cycle);
                req.requested_amount += amt;
                req.updates_count += count;
            }
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.own_staked_balance -= amt;
                baker.own_delegated_balance += amt;
                baker.unstaked_balance += amt;
            } else {
                let staker = session.account_mut(u.staker_id)?;
                staker.unstaked_balance += amt;
                staker.staked_pseudotokens -= pt;
                let baker = session.account_mut(u.baker_id)?;
                baker.external_staked_balance -= amt;
                baker.external_delegated_balance += amt;
                baker.issued_pseudotokens -= pt;
            }
            session.statistics.total_frozen -= amt;
        }
        StakingUpdateKind::Finalize => {
            {
                let req = session.unstake_request_mut(u.baker_id, u.staker_id, u.cycle);
                req.finalized_amount += amt;
                req.updates_count += count;
            }
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.unstaked_balance -= amt;
            } else {
                let staker = session.account_mut(u.staker_id)?;
                staker.unstaked_balance -= amt;
                staker.balance += amt;
                let baker = session.account_mut(u.baker_id)?;
                baker.external_delegated_balance -= amt;
            }
        }
        StakingUpdateKind::Restake => {
            {
                let req = session.unstake_request_mut(u.baker_id, u.staker_id, u.cycle);
                req.restaked_amount += amt;
                req.updates_count += count;
            }
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.unstaked_balance -= amt;
                baker.own_delegated_balance -= amt;
                baker.own_staked_balance += amt;
            } else {
                let staker = session.account_mut(u.staker_id)?;
                staker.unstaked_balance -= amt;
                staker.staked_pseudotokens += pt;
                let baker = session.account_mut(u.baker_id)?;
                baker.external_staked_balance += amt;
                baker.external_delegated_balance -= amt;
                baker.issued_pseudotokens += pt;
            }
            session.statistics.total_frozen += amt;
        }
        StakingUpdateKind::SlashStaked => {
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.own_staked_balance -= eff;
                baker.balance -= eff;
            } else {
                // Stakers lose value through the pool; pseudotokens stay put.
                let baker = session.account_mut(u.baker_id)?;
                baker.external_staked_balance -= eff;
            }
            session.statistics.total_frozen -= eff;
        }
        StakingUpdateKind::SlashUnstaked => {
            {
                let req = session.unstake_request_mut(u.baker_id, u.staker_id, u.cycle);
                req.slashed_amount += amt;
                req.rounding_error += re;
                req.updates_count += count;
            }
            if own {
                let baker = session.account_mut(u.baker_id)?;
                baker.unstaked_balance -= eff;
                baker.own_delegated_balance -= eff;
                baker.balance -= eff;
            } else {
                let staker = session.account_mut(u.staker_id)?;
                staker.unstaked_balance -= eff;
                let baker = session.account_mut(u.baker_id)?;
                baker.external_delegated_balance -= eff;
            }
        }
    }

    // A fully unwound request row disappears with its history.
    if direction < 0 {
        let key = (u.baker_id, u.staker_id, u.cycle);
        if let Some(req) = session.unstake_requests.get(&key) {
            if req.is_empty() {
                session.unstake_requests.remove(&key);
            }
        }
    }

    Ok(())
}
