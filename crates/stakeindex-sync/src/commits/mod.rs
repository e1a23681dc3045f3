//! Versioned commit handlers.
//!
//! One trait per commit family; a protocol version is a [`crate::registry::CommitSet`]
//! of trait objects. Every apply has an exact inverse, and revert reads its
//! inputs from the rows apply stored, never from the node.

use stakeindex_core::model::Protocol;
use stakeindex_core::{
    Staker, SyncError, SyncSession, UpdateCategory, UpdateKind, UpdateOrigin, UpdateTrail,
};

use crate::data::BlockData;

pub mod autostaking;
pub mod baker_cycle;
pub mod block;
pub mod cycle;
pub mod rewards;
pub mod slashing;
pub mod snapshot;

/// Header, events, base reward/bonus/fees, revelations, accusations,
/// deactivations. Runs first on apply, last on revert.
pub trait BlockCommit: Send + Sync {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Cycle-end settlement of attestation reward expectations.
pub trait RewardsCommit: Send + Sync {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Cycle-end classification of protocol-automated staking movements.
pub trait AutostakingCommit: Send + Sync {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Cycle-end resolution of pending double-signing accusations.
pub trait SlashingCommit: Send + Sync {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Per-block settlement of rights expectations plus cycle-begin bootstrap of
/// future (cycle, baker) rows.
pub trait BakerCycleCommit: Send + Sync {
    fn apply_settlement(&self, session: &mut SyncSession, data: &BlockData)
        -> Result<(), SyncError>;

    fn revert_settlement(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;

    fn apply_bootstrap(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        stakes: &dyn StakeSelection,
    ) -> Result<(), SyncError>;

    fn revert_bootstrap(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Cycle-begin creation of the future cycle row with its frozen issuance.
pub trait CycleCommit: Send + Sync {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        stakes: &dyn StakeSelection,
    ) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// Bulk balance capture at snapshot levels.
pub trait SnapshotCommit: Send + Sync {
    fn apply(&self, session: &mut SyncSession, data: &BlockData) -> Result<(), SyncError>;

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError>;
}

/// The stake-selection formula — the piece protocol versions actually
/// disagree on.
pub trait StakeSelection: Send + Sync {
    /// Baking power of one snapshot row, zero when the baker is not
    /// eligible.
    fn baking_power(
        &self,
        proto: &Protocol,
        own_staked: i64,
        external_staked: i64,
        own_delegated: i64,
        external_delegated: i64,
    ) -> i64;
}

// ─── Shared trail consumption ─────────────────────────────────────────────────

/// The four destinations a minted reward is split across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RewardDestinations {
    /// Credited to the baker's spendable (delegated) balance.
    pub delegated: i64,
    /// Credited to the baker's own frozen stake.
    pub staked_own: i64,
    /// The baker's edge over its external pool, frozen as own stake.
    pub staked_edge: i64,
    /// Credited to the shared external stake pool.
    pub staked_shared: i64,
}

impl RewardDestinations {
    pub fn total(&self) -> i64 {
        self.delegated + self.staked_own + self.staked_edge + self.staked_shared
    }
}

/// Outcome of one reward settlement in the trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RewardOutcome {
    Paid(RewardDestinations),
    Burned(i64),
}

/// Consume the next minted reward of `category` together with its adjacent
/// credit entries. Returns the recipient baker address, the minted amount,
/// and where it went.
///
/// When `lost_category` is given, a burned entry of that category satisfies
/// the mint instead: the reward was missed and destroyed.
pub(crate) fn consume_reward(
    trail: &mut UpdateTrail,
    level: i64,
    category: UpdateCategory,
    lost_category: Option<UpdateCategory>,
) -> Result<Option<(String, i64, RewardOutcome)>, SyncError> {
    let mint_idx = match (0..trail.len()).find(|&i| {
        !trail.is_consumed(i) && {
            let u = trail.get(i);
            u.kind == UpdateKind::Minted
                && u.category == Some(category)
                && u.origin == UpdateOrigin::Block
        }
    }) {
        Some(i) => i,
        None => return Ok(None),
    };

    let amount = -trail.get(mint_idx).change;
    if amount <= 0 {
        return Err(SyncError::integrity(
            level,
            format!("minted {category:?} update with non-negative change"),
        ));
    }
    trail.consume(mint_idx);

    // Burned counterpart: the whole reward was missed.
    if let Some(lost) = lost_category {
        if let Some(i) = trail.next_unconsumed(mint_idx + 1) {
            let u = trail.get(i);
            if u.kind == UpdateKind::Burned && u.category == Some(lost) {
                let baker = u.contract.clone().ok_or_else(|| {
                    SyncError::integrity(level, format!("burned {lost:?} update without loser"))
                })?;
                if u.change != amount {
                    return Err(SyncError::integrity(
                        level,
                        format!("burned {lost:?} amount does not match its mint"),
                    ));
                }
                trail.consume(i);
                return Ok(Some((baker, amount, RewardOutcome::Burned(amount))));
            }
        }
    }

    // Credit entries, adjacent in trail order, summing exactly to the mint.
    let mut dest = RewardDestinations::default();
    let mut baker: Option<String> = None;
    let mut remaining = amount;
    let mut cursor = mint_idx + 1;
    while remaining > 0 {
        let i = trail.next_unconsumed(cursor).ok_or_else(|| {
            SyncError::integrity(level, format!("dangling minted {category:?} update"))
        })?;
        let u = trail.get(i).clone();
        let recipient = match (&u.kind, &u.staker) {
            (UpdateKind::Contract, None) => {
                dest.delegated += u.change;
                u.contract.clone().ok_or_else(|| {
                    SyncError::integrity(level, "contract credit without address")
                })?
            }
            (UpdateKind::Freezer, Some(Staker::BakerOwn { baker })) => {
                dest.staked_own += u.change;
                baker.clone()
            }
            (UpdateKind::Freezer, Some(Staker::BakerEdge { baker })) => {
                dest.staked_edge += u.change;
                baker.clone()
            }
            (UpdateKind::Freezer, Some(Staker::Shared { delegate })) => {
                dest.staked_shared += u.change;
                delegate.clone()
            }
            _ => {
                return Err(SyncError::integrity(
                    level,
                    format!("unexpected credit shape for minted {category:?}: {u:?}"),
                ))
            }
        };
        if u.change <= 0 {
            return Err(SyncError::integrity(
                level,
                format!("non-positive credit for minted {category:?}"),
            ));
        }
        match &baker {
            None => baker = Some(recipient),
            Some(b) if *b == recipient => {}
            Some(b) => {
                return Err(SyncError::integrity(
                    level,
                    format!("minted {category:?} credits split across bakers {b} and {recipient}"),
                ))
            }
        }
        remaining -= u.change;
        if remaining < 0 {
            return Err(SyncError::integrity(
                level,
                format!("minted {category:?} credits exceed the minted amount"),
            ));
        }
        trail.consume(i);
        cursor = i + 1;
    }

    let baker = baker
        .ok_or_else(|| SyncError::integrity(level, format!("minted {category:?} with no credits")))?;
    Ok(Some((baker, amount, RewardOutcome::Paid(dest))))
}

/// Consume the block-fee pair: the accumulator debit and the proposer
/// credit. Returns the proposer address and the fee amount.
pub(crate) fn consume_fees(
    trail: &mut UpdateTrail,
    level: i64,
) -> Result<Option<(String, i64)>, SyncError> {
    let acc_idx = match (0..trail.len()).find(|&i| {
        !trail.is_consumed(i) && {
            let u = trail.get(i);
            u.kind == UpdateKind::Accumulator && u.category == Some(UpdateCategory::BlockFees)
        }
    }) {
        Some(i) => i,
        None => return Ok(None),
    };

    let fees = -trail.get(acc_idx).change;
    if fees <= 0 {
        return Err(SyncError::integrity(level, "block-fee accumulator with non-negative change"));
    }
    trail.consume(acc_idx);

    let i = trail
        .next_unconsumed(acc_idx + 1)
        .ok_or_else(|| SyncError::integrity(level, "block fees without recipient"))?;
    let u = trail.get(i).clone();
    if u.kind != UpdateKind::Contract || u.change != fees {
        return Err(SyncError::integrity(level, "block-fee credit does not match accumulator"));
    }
    let proposer = u
        .contract
        .ok_or_else(|| SyncError::integrity(level, "block-fee credit without address"))?;
    trail.consume(i);
    Ok(Some((proposer, fees)))
}

/// Credit a paid reward split onto the baker's balances.
pub(crate) fn credit_destinations(
    session: &mut SyncSession,
    baker_id: i64,
    dest: &RewardDestinations,
) -> Result<(), SyncError> {
    let account = session.account_mut(baker_id)?;
    account.balance += dest.delegated + dest.staked_own + dest.staked_edge;
    account.own_delegated_balance += dest.delegated;
    account.own_staked_balance += dest.staked_own + dest.staked_edge;
    account.external_staked_balance += dest.staked_shared;
    session.statistics.total_frozen += dest.staked_own + dest.staked_edge + dest.staked_shared;
    Ok(())
}

/// Exact inverse of [`credit_destinations`].
pub(crate) fn debit_destinations(
    session: &mut SyncSession,
    baker_id: i64,
    dest: &RewardDestinations,
) -> Result<(), SyncError> {
    let account = session.account_mut(baker_id)?;
    account.balance -= dest.delegated + dest.staked_own + dest.staked_edge;
    account.own_delegated_balance -= dest.delegated;
    account.own_staked_balance -= dest.staked_own + dest.staked_edge;
    account.external_staked_balance -= dest.staked_shared;
    session.statistics.total_frozen -= dest.staked_own + dest.staked_edge + dest.staked_shared;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trail(raw: Vec<serde_json::Value>) -> UpdateTrail {
        UpdateTrail::parse(&raw, 100).unwrap()
    }

    #[test]
    fn consumes_split_reward() {
        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "baking rewards", "change": "-1000" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "600" }),
            json!({ "kind": "freezer", "category": "deposits",
                    "staker": { "baker": "baker1" }, "change": "250" }),
            json!({ "kind": "freezer", "category": "deposits",
                    "staker": { "baker_edge": "baker1" }, "change": "50" }),
            json!({ "kind": "freezer", "category": "deposits",
                    "staker": { "delegate": "baker1" }, "change": "100" }),
        ]);
        let (baker, amount, outcome) =
            consume_reward(&mut t, 100, UpdateCategory::BakingRewards, None)
                .unwrap()
                .unwrap();
        assert_eq!(baker, "baker1");
        assert_eq!(amount, 1000);
        assert_eq!(
            outcome,
            RewardOutcome::Paid(RewardDestinations {
                delegated: 600,
                staked_own: 250,
                staked_edge: 50,
                staked_shared: 100,
            })
        );
        t.ensure_exhausted(100).unwrap();
    }

    #[test]
    fn consumes_burned_reward() {
        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "attesting rewards", "change": "-500" }),
            json!({ "kind": "burned", "category": "lost attesting rewards",
                    "contract": "baker2", "change": "500" }),
        ]);
        let (baker, amount, outcome) = consume_reward(
            &mut t,
            100,
            UpdateCategory::AttestingRewards,
            Some(UpdateCategory::LostAttestingRewards),
        )
        .unwrap()
        .unwrap();
        assert_eq!(baker, "baker2");
        assert_eq!(amount, 500);
        assert_eq!(outcome, RewardOutcome::Burned(500));
        t.ensure_exhausted(100).unwrap();
    }

    #[test]
    fn mixed_baker_credits_are_fatal() {
        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "baking rewards", "change": "-100" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "60" }),
            json!({ "kind": "contract", "contract": "baker2", "change": "40" }),
        ]);
        let err = consume_reward(&mut t, 100, UpdateCategory::BakingRewards, None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn fee_pair() {
        let mut t = trail(vec![
            json!({ "kind": "accumulator", "category": "block fees", "change": "-77" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "77" }),
        ]);
        let (proposer, fees) = consume_fees(&mut t, 100).unwrap().unwrap();
        assert_eq!(proposer, "baker1");
        assert_eq!(fees, 77);
        t.ensure_exhausted(100).unwrap();
    }

    #[test]
    fn absent_reward_is_none() {
        let mut t = trail(vec![]);
        assert!(consume_reward(&mut t, 100, UpdateCategory::BakingRewards, None)
            .unwrap()
            .is_none());
        assert!(consume_fees(&mut t, 100).unwrap().is_none());
    }
}
