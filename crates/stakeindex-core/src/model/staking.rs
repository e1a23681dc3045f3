//! The staking-update ledger rows and pending unstake requests.

use serde::{Deserialize, Serialize};

/// The kind of atomic staking-balance movement a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingUpdateKind {
    /// Delegated funds became frozen stake.
    Stake,
    /// Frozen stake became a pending unstake request.
    Unstake,
    /// A pending unstake request was paid out.
    Finalize,
    /// A pending unstake request was frozen again.
    Restake,
    /// Frozen stake was slashed.
    SlashStaked,
    /// A pending unstake request was slashed.
    SlashUnstaked,
}

/// Back-pointer from a ledger entry to the operation that caused it, so
/// revert can find and undo exactly the updates of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingUpdateSource {
    Autostaking(i64),
    DoubleSigning(i64),
}

/// Append-only, globally sequenced ledger entry. The single source of truth
/// for every staking-balance mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingUpdate {
    /// Global sequence id; strictly increasing on apply, strictly decreasing
    /// on revert.
    pub id: i64,
    pub level: i64,
    /// Cycle tag: the unstake-request cycle for unstake-flavored kinds, the
    /// block's cycle otherwise.
    pub cycle: i64,
    pub baker_id: i64,
    pub staker_id: i64,
    pub kind: StakingUpdateKind,
    pub amount: i64,
    /// Pseudotokens minted or burned along with the movement.
    pub pseudotokens: i64,
    /// Correction absorbed by the designated last entry of a pro-rata
    /// distribution, so the applied total reconciles with the
    /// externally-reported figure exactly. The effective pool delta is
    /// `amount - rounding_error`.
    pub rounding_error: i64,
    pub source: StakingUpdateSource,
}

impl StakingUpdate {
    /// The amount actually applied to the affected pool.
    pub fn effective_amount(&self) -> i64 {
        self.amount - self.rounding_error
    }

    /// `true` when baker and staker coincide (the baker's own funds).
    pub fn is_own(&self) -> bool {
        self.baker_id == self.staker_id
    }
}

/// Pending unstaked funds per (baker, staker, request cycle), decremented by
/// finalization, restaking, and slashing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnstakeRequest {
    pub baker_id: i64,
    pub staker_id: i64,
    pub cycle: i64,
    pub requested_amount: i64,
    pub restaked_amount: i64,
    pub finalized_amount: i64,
    pub slashed_amount: i64,
    /// Net rounding carried by slashing corrections against this request.
    pub rounding_error: i64,
    pub updates_count: i32,
}

impl UnstakeRequest {
    pub fn new(baker_id: i64, staker_id: i64, cycle: i64) -> Self {
        Self {
            baker_id,
            staker_id,
            cycle,
            ..Default::default()
        }
    }

    /// Funds still pending (and still slashable).
    pub fn remaining(&self) -> i64 {
        self.requested_amount
            - self.restaked_amount
            - self.finalized_amount
            - self.slashed_amount
            + self.rounding_error
    }

    /// A fully drained request with no ledger history can be dropped.
    pub fn is_empty(&self) -> bool {
        self.updates_count == 0 && self.remaining() == 0
    }
}
