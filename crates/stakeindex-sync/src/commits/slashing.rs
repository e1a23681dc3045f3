//! Cycle-end resolution of double-signing penalties.
//!
//! Delayed-origin trail entries are grouped by operation hash; each group
//! settles one pending accusation. The trail reports pool-level quantities;
//! the per-staker distribution of external losses is derived locally:
//! staked pools pro rata over pseudotoken holdings, unstaked pools by
//! diffing every affected staker's pending requests against the node's
//! authoritative post-block view. Rounding against the reported totals is
//! absorbed by one designated last entry.

use std::collections::{BTreeMap, HashMap};

use stakeindex_core::model::{DoubleSigningKind, StakingUpdateKind, StakingUpdateSource};
use stakeindex_core::{Staker, SyncError, SyncSession, UpdateCategory, UpdateKind, UpdateTrail};

use crate::commits::SlashingCommit;
use crate::data::BlockData;
use crate::ledger;

/// One parsed accusation settlement.
#[derive(Debug, Clone)]
struct Accusation {
    op_id: i64,
    offender_id: i64,
    offender_addr: String,
    kind: DoubleSigningKind,
    accuser_id: i64,
    own_staked: i64,
    external_staked: i64,
    /// `(cycle, amount)` in trail order.
    unstaked_own: Vec<(i64, i64)>,
    /// Reported external unstaked losses per cycle.
    unstaked_external: BTreeMap<i64, i64>,
    burned: i64,
    reward: i64,
}

impl Accusation {
    fn total_lost(&self) -> i64 {
        self.own_staked
            + self.external_staked
            + self.unstaked_own.iter().map(|(_, a)| a).sum::<i64>()
            + self.unstaked_external.values().sum::<i64>()
    }
}

/// Group the delayed entries by operation hash, preserving first-appearance
/// order, and parse each group into an [`Accusation`].
fn parse_accusations(
    session: &SyncSession,
    trail: &mut UpdateTrail,
    level: i64,
) -> Result<Vec<Accusation>, SyncError> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for i in trail.unconsumed() {
        let u = trail.get(i);
        if !u.is_delayed() {
            continue;
        }
        let hash = u
            .delayed_op_hash
            .clone()
            .ok_or_else(|| SyncError::integrity(level, "delayed update without operation hash"))?;
        if !groups.contains_key(&hash) {
            order.push(hash.clone());
        }
        groups.entry(hash).or_default().push(i);
    }

    let mut accusations = Vec::with_capacity(order.len());
    for hash in order {
        let op = session
            .double_signing_ops
            .values()
            .find(|o| o.op_hash == hash && o.slashed_level.is_none())
            .cloned()
            .ok_or_else(|| {
                SyncError::integrity(level, format!("no pending accusation for operation {hash}"))
            })?;
        let offender_addr = session.account(op.offender_id)?.address.clone();

        let mut acc = Accusation {
            op_id: op.id,
            offender_id: op.offender_id,
            offender_addr: offender_addr.clone(),
            kind: op.kind,
            accuser_id: op.accuser_id,
            own_staked: 0,
            external_staked: 0,
            unstaked_own: Vec::new(),
            unstaked_external: BTreeMap::new(),
            burned: 0,
            reward: 0,
        };

        for i in groups.remove(&hash).unwrap_or_default() {
            let u = trail.get(i).clone();
            trail.consume(i);
            let bad = |reason: String| SyncError::integrity(level, reason);
            match (u.kind, u.category) {
                (UpdateKind::Freezer, Some(UpdateCategory::Deposits)) => {
                    if u.change >= 0 {
                        return Err(bad("slashing deposit entry with non-negative change".into()));
                    }
                    let staker = u.staker.as_ref().ok_or_else(|| bad("freezer without staker".into()))?;
                    if staker.baker() != offender_addr {
                        return Err(bad(format!(
                            "accusation {hash} slashes a baker other than its offender"
                        )));
                    }
                    match staker {
                        Staker::Shared { .. } => acc.external_staked += -u.change,
                        _ => acc.own_staked += -u.change,
                    }
                }
                (UpdateKind::Freezer, Some(UpdateCategory::UnstakedDeposits)) => {
                    if u.change >= 0 {
                        return Err(bad("slashing unstaked entry with non-negative change".into()));
                    }
                    let staker = u.staker.as_ref().ok_or_else(|| bad("freezer without staker".into()))?;
                    if staker.baker() != offender_addr {
                        return Err(bad(format!(
                            "accusation {hash} slashes a baker other than its offender"
                        )));
                    }
                    let cycle = u.cycle.ok_or_else(|| bad("unstaked entry without cycle".into()))?;
                    // Shared entries report the pool; anything else is the
                    // baker's own funds.
                    if matches!(staker, Staker::Shared { .. }) {
                        *acc.unstaked_external.entry(cycle).or_default() += -u.change;
                    } else {
                        acc.unstaked_own.push((cycle, -u.change));
                    }
                }
                (UpdateKind::Burned, Some(UpdateCategory::Punishments)) => {
                    if u.change <= 0 {
                        return Err(bad("punishment burn with non-positive change".into()));
                    }
                    acc.burned += u.change;
                }
                (UpdateKind::Contract, _) => {
                    if u.change <= 0 {
                        return Err(bad("accuser reward with non-positive change".into()));
                    }
                    let addr = u.contract.ok_or_else(|| bad("reward without address".into()))?;
                    let accuser_addr = session.account(op.accuser_id)?.address.clone();
                    if addr != accuser_addr {
                        return Err(bad(format!(
                            "accusation {hash} reward credited past the accuser"
                        )));
                    }
                    acc.reward += u.change;
                }
                _ => {
                    return Err(bad(format!(
                        "unexpected entry in accusation {hash}: {u:?}"
                    )))
                }
            }
        }

        // Slashed value is conserved: everything lost is either burned or
        // paid to the accuser.
        if acc.total_lost() != acc.burned + acc.reward {
            return Err(SyncError::integrity(
                level,
                format!(
                    "accusation {hash}: lost {} != burned {} + reward {}",
                    acc.total_lost(),
                    acc.burned,
                    acc.reward
                ),
            ));
        }
        accusations.push(acc);
    }
    Ok(accusations)
}

/// Per-accusation ledger allocations for external unstaked losses:
/// `(staker_id, cycle, amount, rounding_error)`.
type UnstakedAlloc = HashMap<i64, Vec<(i64, i64, i64, i64)>>;

/// Diff every affected staker's pending requests against the node's
/// post-block view and allocate the differences across the offender's
/// accusations.
fn allocate_external_unstaked(
    session: &SyncSession,
    data: &BlockData,
    level: i64,
    accusations: &[Accusation],
    apportion: bool,
) -> Result<UnstakedAlloc, SyncError> {
    let mut alloc: UnstakedAlloc = HashMap::new();

    let mut offenders: Vec<i64> = Vec::new();
    for acc in accusations {
        if !offenders.contains(&acc.offender_id) {
            offenders.push(acc.offender_id);
        }
    }

    for offender in offenders {
        let accs: Vec<&Accusation> = accusations
            .iter()
            .filter(|a| a.offender_id == offender)
            .collect();
        let mut reported_by_cycle: BTreeMap<i64, i64> = BTreeMap::new();
        for acc in &accs {
            for (&cycle, &amount) in &acc.unstaked_external {
                *reported_by_cycle.entry(cycle).or_default() += amount;
            }
        }
        if reported_by_cycle.is_empty() {
            continue;
        }
        let with_external = accs.iter().filter(|a| !a.unstaked_external.is_empty()).count();
        if !apportion && with_external > 1 {
            return Err(SyncError::integrity(
                level,
                "multiple accusations against one unstaked pool need apportionment support",
            ));
        }

        let offender_addr = &accs[0].offender_addr;
        let deposits = data.unstaked_deposits.get(offender_addr).ok_or_else(|| {
            SyncError::integrity(
                level,
                format!("unstaked deposits for {offender_addr} were not prefetched"),
            )
        })?;

        // Local pending requests, cycle-major with ascending staker ids so
        // the designated rounding target is deterministic.
        let mut pending: Vec<(i64, i64, i64)> = session
            .unstake_requests
            .values()
            .filter(|r| r.baker_id == offender && r.remaining() > 0)
            .map(|r| (r.cycle, r.staker_id, r.remaining()))
            .collect();
        pending.sort_unstable();

        let own_reported: BTreeMap<i64, i64> = accs
            .iter()
            .flat_map(|a| a.unstaked_own.iter().copied())
            .fold(BTreeMap::new(), |mut m, (c, a)| {
                *m.entry(c).or_default() += a;
                m
            });
        let total_burned: i64 = accs.iter().map(|a| a.burned).sum();

        for (&cycle, &reported) in &reported_by_cycle {
            let mut diffs: Vec<(i64, i64)> = Vec::new();
            let mut sum_diffs = 0;
            let mut local_total = 0;
            for &(c, staker_id, remaining) in pending.iter().filter(|&&(c, ..)| c == cycle) {
                local_total += remaining;
                if staker_id == offender {
                    continue;
                }
                let addr = session.account(staker_id)?.address.clone();
                let view = data.staker_requests.get(&addr).ok_or_else(|| {
                    SyncError::integrity(
                        level,
                        format!("unstake requests for {addr} were not prefetched (pruned context?)"),
                    )
                })?;
                let after = view
                    .iter()
                    .find(|r| r.cycle == c)
                    .map(|r| r.amount)
                    .unwrap_or(0);
                let diff = remaining - after;
                if diff < 0 {
                    return Err(SyncError::integrity(
                        level,
                        format!("unstake request of {addr} grew during slashing"),
                    ));
                }
                if diff > 0 {
                    diffs.push((staker_id, diff));
                    sum_diffs += diff;
                }
            }
            if diffs.is_empty() {
                return Err(SyncError::integrity(
                    level,
                    format!("reported external unstaked slash for cycle {cycle} hit no staker"),
                ));
            }

            // Baker-level cross-check: the node's own deposit view must
            // agree with the per-staker views plus the trail.
            let deposit_after = deposits
                .iter()
                .find(|d| d.cycle == cycle)
                .map(|d| d.deposit)
                .unwrap_or(0);
            let own = own_reported.get(&cycle).copied().unwrap_or(0);
            if local_total - deposit_after != own + sum_diffs {
                return Err(SyncError::integrity(
                    level,
                    format!(
                        "unstaked deposit view for {offender_addr} cycle {cycle} disagrees with \
                         per-staker views"
                    ),
                ));
            }

            let rounding = sum_diffs - reported;
            let last_staker = diffs.len() - 1;
            for (i, &(staker_id, diff)) in diffs.iter().enumerate() {
                let entry_rounding = if i == last_staker { rounding } else { 0 };
                // Split this staker's loss across the accusations by burned
                // share; the final accusation takes the remainder and the
                // rounding correction.
                let mut allocated = 0;
                let last_acc = accs.len() - 1;
                for (k, acc) in accs.iter().enumerate() {
                    let part = if k == last_acc {
                        diff - allocated
                    } else {
                        (diff as i128 * acc.burned as i128 / total_burned.max(1) as i128) as i64
                    };
                    allocated += part;
                    let part_rounding = if k == last_acc { entry_rounding } else { 0 };
                    if part != 0 || part_rounding != 0 {
                        alloc
                            .entry(acc.op_id)
                            .or_default()
                            .push((staker_id, cycle, part, part_rounding));
                    }
                }
            }
        }
    }
    Ok(alloc)
}

fn settle(
    session: &mut SyncSession,
    data: &BlockData,
    trail: &mut UpdateTrail,
    apportion: bool,
) -> Result<(), SyncError> {
    let level = data.level();
    let cycle = session.block(level)?.cycle;

    let accusations = parse_accusations(session, trail, level)?;
    if accusations.is_empty() {
        return Ok(());
    }
    let alloc = allocate_external_unstaked(session, data, level, &accusations, apportion)?;

    for acc in &accusations {
        let source = StakingUpdateSource::DoubleSigning(acc.op_id);
        let mut entries = 0i32;

        if acc.own_staked > 0 {
            ledger::apply(
                session,
                level,
                ledger::LedgerEntry {
                    cycle,
                    baker_id: acc.offender_id,
                    staker_id: acc.offender_id,
                    kind: StakingUpdateKind::SlashStaked,
                    amount: acc.own_staked,
                    pseudotokens: 0,
                    rounding_error: 0,
                    source,
                },
            )?;
            entries += 1;
        }

        if acc.external_staked > 0 {
            // Pro rata over pseudotoken holders against the current pool;
            // the last staker absorbs the rounding against the reported
            // figure.
            let offender = session.account(acc.offender_id)?;
            let pool = offender.external_staked_balance;
            let total_pt = offender.issued_pseudotokens;
            let stakers = session.stakers_of(acc.offender_id);
            if stakers.is_empty() || total_pt <= 0 || pool < acc.external_staked {
                return Err(SyncError::integrity(
                    level,
                    format!("external stake slash of {} exceeds the pool", acc.external_staked),
                ));
            }
            let pool_after = pool - acc.external_staked;
            let mut shares = Vec::with_capacity(stakers.len());
            let mut computed = 0;
            for &staker_id in &stakers {
                let pt = session.account(staker_id)?.staked_pseudotokens;
                let share = ledger::stake_for_pseudotokens(pool, total_pt, pt)
                    - ledger::stake_for_pseudotokens(pool_after, total_pt, pt);
                computed += share;
                shares.push((staker_id, share));
            }
            let rounding = computed - acc.external_staked;
            let last = shares.len() - 1;
            for (i, (staker_id, share)) in shares.into_iter().enumerate() {
                let entry_rounding = if i == last { rounding } else { 0 };
                if share == 0 && entry_rounding == 0 {
                    continue;
                }
                ledger::apply(
                    session,
                    level,
                    ledger::LedgerEntry {
                        cycle,
                        baker_id: acc.offender_id,
                        staker_id,
                        kind: StakingUpdateKind::SlashStaked,
                        amount: share,
                        pseudotokens: 0,
                        rounding_error: entry_rounding,
                        source,
                    },
                )?;
                entries += 1;
            }
        }

        for &(req_cycle, amount) in &acc.unstaked_own {
            let remaining = session
                .unstake_requests
                .get(&(acc.offender_id, acc.offender_id, req_cycle))
                .map(|r| r.remaining())
                .unwrap_or(0);
            if remaining < amount {
                return Err(SyncError::integrity(
                    level,
                    format!(
                        "own unstaked slash of {amount} exceeds request remaining {remaining}"
                    ),
                ));
            }
            ledger::apply(
                session,
                level,
                ledger::LedgerEntry {
                    cycle: req_cycle,
                    baker_id: acc.offender_id,
                    staker_id: acc.offender_id,
                    kind: StakingUpdateKind::SlashUnstaked,
                    amount,
                    pseudotokens: 0,
                    rounding_error: 0,
                    source,
                },
            )?;
            entries += 1;
        }

        if let Some(parts) = alloc.get(&acc.op_id) {
            for &(staker_id, req_cycle, amount, rounding) in parts {
                ledger::apply(
                    session,
                    level,
                    ledger::LedgerEntry {
                        cycle: req_cycle,
                        baker_id: acc.offender_id,
                        staker_id,
                        kind: StakingUpdateKind::SlashUnstaked,
                        amount,
                        pseudotokens: 0,
                        rounding_error: rounding,
                        source,
                    },
                )?;
                entries += 1;
            }
        }

        // Accuser's cut.
        if acc.reward > 0 {
            let accuser = session.account_mut(acc.accuser_id)?;
            accuser.balance += acc.reward;
            accuser.own_delegated_balance += acc.reward;
        }
        session.statistics.total_burned += acc.burned;

        if let Some(bc) = session.baker_cycle_mut(cycle, acc.offender_id) {
            match acc.kind {
                DoubleSigningKind::Baking => bc.double_baking_losses += acc.total_lost(),
                DoubleSigningKind::Attesting => bc.double_attesting_losses += acc.total_lost(),
                DoubleSigningKind::Preattesting => {
                    bc.double_preattesting_losses += acc.total_lost()
                }
            }
        }
        if let Some(bc) = session.baker_cycle_mut(cycle, acc.accuser_id) {
            match acc.kind {
                DoubleSigningKind::Baking => bc.double_baking_rewards += acc.reward,
                DoubleSigningKind::Attesting => bc.double_attesting_rewards += acc.reward,
                DoubleSigningKind::Preattesting => bc.double_preattesting_rewards += acc.reward,
            }
        }

        let op = session
            .double_signing_ops
            .get_mut(&acc.op_id)
            .ok_or_else(|| SyncError::integrity(level, "accusation row vanished"))?;
        op.slashed_level = Some(level);
        op.reward = acc.reward;
        op.lost_staked = acc.own_staked;
        op.lost_external_staked = acc.external_staked;
        op.lost_unstaked = acc.unstaked_own.iter().map(|(_, a)| a).sum();
        op.lost_external_unstaked = acc.unstaked_external.values().sum();
        op.staking_updates_count = entries;

        tracing::debug!(
            level,
            op = acc.op_id,
            offender = acc.offender_id,
            lost = acc.total_lost(),
            reward = acc.reward,
            "accusation settled"
        );
    }
    Ok(())
}

fn unsettle(session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
    let cycle = session.block(level)?.cycle;
    // Settlement order follows the trail, not the op ids, so the unwind
    // order comes from the ledger: the accusation whose entries sit on top
    // reverts first.
    let mut ids: Vec<(i64, i64)> = session
        .double_signing_ops
        .values()
        .filter(|o| o.slashed_level == Some(level))
        .map(|o| {
            let top = session
                .staking_updates
                .values()
                .filter(|u| u.source == StakingUpdateSource::DoubleSigning(o.id))
                .map(|u| u.id)
                .max()
                .unwrap_or(i64::MIN);
            (top, o.id)
        })
        .collect();
    ids.sort_unstable();
    for (_, id) in ids.into_iter().rev() {
        let op = session
            .double_signing_ops
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::revert(level, format!("accusation {id} not found")))?;

        ledger::revert_for_source(session, StakingUpdateSource::DoubleSigning(id))?;

        if op.reward > 0 {
            let accuser = session.account_mut(op.accuser_id)?;
            accuser.balance -= op.reward;
            accuser.own_delegated_balance -= op.reward;
        }
        session.statistics.total_burned -= op.burned();

        if let Some(bc) = session.baker_cycle_mut(cycle, op.offender_id) {
            match op.kind {
                DoubleSigningKind::Baking => bc.double_baking_losses -= op.total_lost(),
                DoubleSigningKind::Attesting => bc.double_attesting_losses -= op.total_lost(),
                DoubleSigningKind::Preattesting => {
                    bc.double_preattesting_losses -= op.total_lost()
                }
            }
        }
        if let Some(bc) = session.baker_cycle_mut(cycle, op.accuser_id) {
            match op.kind {
                DoubleSigningKind::Baking => bc.double_baking_rewards -= op.reward,
                DoubleSigningKind::Attesting => bc.double_attesting_rewards -= op.reward,
                DoubleSigningKind::Preattesting => bc.double_preattesting_rewards -= op.reward,
            }
        }

        let row = session
            .double_signing_ops
            .get_mut(&id)
            .ok_or_else(|| SyncError::revert(level, format!("accusation {id} not found")))?;
        row.slashed_level = None;
        row.reward = 0;
        row.lost_staked = 0;
        row.lost_unstaked = 0;
        row.lost_external_staked = 0;
        row.lost_external_unstaked = 0;
        row.staking_updates_count = 0;
    }
    Ok(())
}

/// Original apportionment: one accusation per slashed pool at a time.
pub struct SlashingCommitV1;

impl SlashingCommit for SlashingCommitV1 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError> {
        settle(session, data, trail, false)
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        unsettle(session, level)
    }
}

/// Apportions simultaneous accusations against one offender by burned
/// share.
pub struct SlashingCommitV3;

impl SlashingCommit for SlashingCommitV3 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError> {
        settle(session, data, trail, true)
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        unsettle(session, level)
    }
}
