//! Immutable per-version protocol constants and cycle arithmetic.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Economic and timing constants of one protocol version.
///
/// Read-only during sync; looked up by `code` (from the block header) or by
/// hash. Every cycle-boundary predicate in the sync core goes through the
/// methods below so the arithmetic lives in exactly one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub code: i32,
    pub hash: String,
    /// First level at which this protocol is active.
    pub first_level: i64,
    /// Cycle containing `first_level`.
    pub first_cycle: i64,
    pub blocks_per_cycle: i64,
    pub blocks_per_snapshot: i64,
    /// Attestation slots per block.
    pub attesters_per_block: i64,
    /// Slots required for the block bonus to reach its maximum.
    pub consensus_threshold: i64,
    /// How many cycles ahead rights are assigned (preserved cycles).
    pub consensus_rights_delay: i64,
    /// Minimum total baking power to be selected for rights.
    pub minimal_stake: i64,
    /// Minimum own frozen stake to be selected for rights.
    pub minimal_frozen_stake: i64,
    /// Delegated stake counts up to this multiple of frozen stake.
    pub max_delegated_over_frozen: i64,
    /// External staked funds count up to this multiple of own staked funds.
    pub max_external_over_own: i64,
    /// Cycles of inactivity before a baker is deactivated.
    pub grace_cycles: i64,
    /// Cycles an unstake request stays pending (and slashable).
    pub unstake_cooldown_cycles: i64,
}

impl Protocol {
    /// Structural sanity of the constants; called once when a session starts.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.blocks_per_cycle <= 0 || self.blocks_per_snapshot <= 0 {
            return Err(SyncError::integrity(
                self.first_level,
                format!("protocol {}: non-positive cycle constants", self.code),
            ));
        }
        // Cycle ends must land on snapshot levels; the cycle-begin bootstrap
        // reads the snapshot taken at the previous cycle's last level.
        if self.blocks_per_cycle % self.blocks_per_snapshot != 0 {
            return Err(SyncError::integrity(
                self.first_level,
                format!(
                    "protocol {}: blocks_per_cycle {} not divisible by blocks_per_snapshot {}",
                    self.code, self.blocks_per_cycle, self.blocks_per_snapshot
                ),
            ));
        }
        if self.attesters_per_block <= 0 {
            return Err(SyncError::integrity(
                self.first_level,
                format!("protocol {}: non-positive attesters_per_block", self.code),
            ));
        }
        Ok(())
    }

    pub fn cycle_of(&self, level: i64) -> i64 {
        self.first_cycle + (level - self.first_level) / self.blocks_per_cycle
    }

    pub fn cycle_start(&self, cycle: i64) -> i64 {
        self.first_level + (cycle - self.first_cycle) * self.blocks_per_cycle
    }

    pub fn cycle_end(&self, cycle: i64) -> i64 {
        self.cycle_start(cycle) + self.blocks_per_cycle - 1
    }

    pub fn is_cycle_start(&self, level: i64) -> bool {
        (level - self.first_level) % self.blocks_per_cycle == 0
    }

    pub fn is_cycle_end(&self, level: i64) -> bool {
        (level - self.first_level + 1) % self.blocks_per_cycle == 0
    }

    /// Zero-based position of `level` within its cycle.
    pub fn cycle_position(&self, level: i64) -> i64 {
        (level - self.first_level) % self.blocks_per_cycle
    }

    /// Balance snapshots are due every `blocks_per_snapshot` levels.
    pub fn is_snapshot_level(&self, level: i64) -> bool {
        (self.cycle_position(level) + 1) % self.blocks_per_snapshot == 0
    }

    /// Deactivation level granted to a baker active at `level`.
    pub fn grace_level(&self, level: i64) -> i64 {
        self.cycle_start(self.cycle_of(level) + self.grace_cycles + 1)
    }

    /// Expected total attestation slots in one cycle — the integrity check
    /// applied to every bulk rights fetch.
    pub fn slots_per_cycle(&self) -> i64 {
        self.blocks_per_cycle * self.attesters_per_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_protocol() -> Protocol {
        Protocol {
            code: 1,
            hash: "PtTest1".into(),
            first_level: 1,
            first_cycle: 0,
            blocks_per_cycle: 8,
            blocks_per_snapshot: 4,
            attesters_per_block: 16,
            consensus_threshold: 11,
            consensus_rights_delay: 2,
            minimal_stake: 6_000,
            minimal_frozen_stake: 600,
            max_delegated_over_frozen: 9,
            max_external_over_own: 5,
            grace_cycles: 3,
            unstake_cooldown_cycles: 4,
        }
    }

    #[test]
    fn cycle_arithmetic() {
        let p = test_protocol();
        assert_eq!(p.cycle_of(1), 0);
        assert_eq!(p.cycle_of(8), 0);
        assert_eq!(p.cycle_of(9), 1);
        assert_eq!(p.cycle_start(1), 9);
        assert_eq!(p.cycle_end(1), 16);
        assert!(p.is_cycle_start(9));
        assert!(p.is_cycle_end(8));
        assert!(!p.is_cycle_end(9));
    }

    #[test]
    fn snapshot_levels() {
        let p = test_protocol();
        // positions 3 and 7 within each cycle (1-based 4th and 8th block)
        assert!(p.is_snapshot_level(4));
        assert!(p.is_snapshot_level(8));
        assert!(!p.is_snapshot_level(5));
        // cycle ends are always snapshot levels
        assert!(p.is_snapshot_level(p.cycle_end(3)));
    }

    #[test]
    fn validate_rejects_misaligned_snapshots() {
        let mut p = test_protocol();
        p.blocks_per_snapshot = 3;
        assert!(p.validate().is_err());
    }

    #[test]
    fn grace_level_extends_past_current_cycle() {
        let p = test_protocol();
        // active at level 10 (cycle 1) → deactivation at start of cycle 5
        assert_eq!(p.grace_level(10), p.cycle_start(5));
    }
}
