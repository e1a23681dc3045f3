//! The per-level block row and its event bitmask.

use serde::{Deserialize, Serialize};

// ─── BlockEvents ──────────────────────────────────────────────────────────────

/// Block-level event flags computed by the block commit and branched on by
/// every sibling commit, both on apply and (from the stored row) on revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockEvents(u32);

impl BlockEvents {
    pub const NONE: Self = Self(0);
    /// First level of a cycle.
    pub const CYCLE_BEGIN: Self = Self(1);
    /// Last level of a cycle.
    pub const CYCLE_END: Self = Self(1 << 1);
    /// First level of a new protocol version.
    pub const PROTOCOL_BEGIN: Self = Self(1 << 2);
    /// Last level of the active protocol version.
    pub const PROTOCOL_END: Self = Self(1 << 3);
    /// The block carries a deactivated-baker list.
    pub const DEACTIVATIONS: Self = Self(1 << 4);
    /// A balance snapshot is due at this level.
    pub const BALANCE_SNAPSHOT: Self = Self(1 << 5);
    /// Delayed slashing settlements are present.
    pub const SLASHING: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BlockEvents {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// One row per chain level.
///
/// Besides header data, the row carries everything revert needs to undo the
/// block exactly: the event bitmask, the classified reward split, and the
/// deactivation levels that were overwritten when grace periods were
/// extended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub level: i64,
    pub hash: String,
    pub predecessor: String,
    pub timestamp: i64,
    pub cycle: i64,
    pub proto_code: i32,
    /// Consensus round, decoded from the big-endian fitness tail.
    pub round: i32,
    pub payload_round: i32,
    /// Baker that proposed the payload (earns the base reward).
    pub proposer_id: i64,
    /// Baker that produced the block (earns the bonus).
    pub producer_id: i64,
    pub events: BlockEvents,

    pub fees: i64,
    pub reward_delegated: i64,
    pub reward_staked_own: i64,
    pub reward_staked_edge: i64,
    pub reward_staked_shared: i64,
    pub bonus_delegated: i64,
    pub bonus_staked_own: i64,
    pub bonus_staked_edge: i64,
    pub bonus_staked_shared: i64,
    /// Per-block protocol subsidy, when the trail carries one.
    pub subsidy: i64,
    pub subsidy_recipient_id: i64,

    /// Attestation outcome for the previous level: `(baker_id, slots)` per
    /// attesting baker, recorded so revert can undo settlement symmetrically.
    pub attestations: Vec<(i64, i64)>,
    /// `(account_id, previous deactivation level)` for each baker whose grace
    /// period this block extended.
    pub reset_deactivations: Vec<(i64, i64)>,
    /// `(account_id, previous deactivation level)` for each baker this block
    /// deactivated.
    pub deactivated: Vec<(i64, i64)>,
    /// Accounts first seen in this block, removed again on revert.
    pub created_accounts: Vec<i64>,
}

impl Block {
    pub fn total_reward(&self) -> i64 {
        self.reward_delegated
            + self.reward_staked_own
            + self.reward_staked_edge
            + self.reward_staked_shared
    }

    pub fn total_bonus(&self) -> i64 {
        self.bonus_delegated
            + self.bonus_staked_own
            + self.bonus_staked_edge
            + self.bonus_staked_shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_bitmask() {
        let mut e = BlockEvents::NONE;
        assert!(!e.contains(BlockEvents::CYCLE_END));
        e.insert(BlockEvents::CYCLE_END);
        e.insert(BlockEvents::BALANCE_SNAPSHOT);
        assert!(e.contains(BlockEvents::CYCLE_END));
        assert!(e.contains(BlockEvents::BALANCE_SNAPSHOT));
        assert!(!e.contains(BlockEvents::CYCLE_BEGIN));
        assert_eq!(
            e,
            BlockEvents::CYCLE_END | BlockEvents::BALANCE_SNAPSHOT
        );
    }

    #[test]
    fn contains_requires_all_flags() {
        let e = BlockEvents::CYCLE_END | BlockEvents::SLASHING;
        assert!(e.contains(BlockEvents::CYCLE_END | BlockEvents::SLASHING));
        assert!(!e.contains(BlockEvents::CYCLE_END | BlockEvents::CYCLE_BEGIN));
    }
}
