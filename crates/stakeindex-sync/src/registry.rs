//! Protocol version to commit-set dispatch.
//!
//! A commit set is resolved once per block from the protocol code; every
//! handler is a stateless static so sets are plain bundles of trait-object
//! references.

use stakeindex_core::SyncError;

use crate::commits::autostaking::AutostakingCommitV1;
use crate::commits::baker_cycle::BakerCycleCommitV1;
use crate::commits::block::BlockCommitV1;
use crate::commits::cycle::{CycleCommitV1, StakeSelectionV1, StakeSelectionV2};
use crate::commits::rewards::RewardsCommitV1;
use crate::commits::slashing::{SlashingCommitV1, SlashingCommitV3};
use crate::commits::snapshot::SnapshotCommitV1;
use crate::commits::{
    AutostakingCommit, BakerCycleCommit, BlockCommit, CycleCommit, RewardsCommit, SlashingCommit,
    SnapshotCommit, StakeSelection,
};

/// Every handler one protocol version runs its blocks through.
pub struct CommitSet {
    pub block: &'static dyn BlockCommit,
    pub rewards: &'static dyn RewardsCommit,
    pub autostaking: &'static dyn AutostakingCommit,
    pub slashing: &'static dyn SlashingCommit,
    pub baker_cycles: &'static dyn BakerCycleCommit,
    pub cycles: &'static dyn CycleCommit,
    pub snapshots: &'static dyn SnapshotCommit,
    pub stakes: &'static dyn StakeSelection,
}

static BLOCK_V1: BlockCommitV1 = BlockCommitV1;
static REWARDS_V1: RewardsCommitV1 = RewardsCommitV1;
static AUTOSTAKING_V1: AutostakingCommitV1 = AutostakingCommitV1;
static SLASHING_V1: SlashingCommitV1 = SlashingCommitV1;
static SLASHING_V3: SlashingCommitV3 = SlashingCommitV3;
static BAKER_CYCLES_V1: BakerCycleCommitV1 = BakerCycleCommitV1;
static CYCLES_V1: CycleCommitV1 = CycleCommitV1;
static SNAPSHOTS_V1: SnapshotCommitV1 = SnapshotCommitV1;
static STAKES_V1: StakeSelectionV1 = StakeSelectionV1;
static STAKES_V2: StakeSelectionV2 = StakeSelectionV2;

static SET_V1: CommitSet = CommitSet {
    block: &BLOCK_V1,
    rewards: &REWARDS_V1,
    autostaking: &AUTOSTAKING_V1,
    slashing: &SLASHING_V1,
    baker_cycles: &BAKER_CYCLES_V1,
    cycles: &CYCLES_V1,
    snapshots: &SNAPSHOTS_V1,
    stakes: &STAKES_V1,
};

/// External stake capped at a multiple of the baker's own.
static SET_V2: CommitSet = CommitSet {
    block: &BLOCK_V1,
    rewards: &REWARDS_V1,
    autostaking: &AUTOSTAKING_V1,
    slashing: &SLASHING_V1,
    baker_cycles: &BAKER_CYCLES_V1,
    cycles: &CYCLES_V1,
    snapshots: &SNAPSHOTS_V1,
    stakes: &STAKES_V2,
};

/// Simultaneous accusations against one offender are apportioned.
static SET_V3: CommitSet = CommitSet {
    block: &BLOCK_V1,
    rewards: &REWARDS_V1,
    autostaking: &AUTOSTAKING_V1,
    slashing: &SLASHING_V3,
    baker_cycles: &BAKER_CYCLES_V1,
    cycles: &CYCLES_V1,
    snapshots: &SNAPSHOTS_V1,
    stakes: &STAKES_V2,
};

/// Resolve the commit set for a protocol code. Unknown codes are fatal: a
/// commit set must exist before its first block is applied.
pub fn commit_set(code: i32, level: i64) -> Result<&'static CommitSet, SyncError> {
    match code {
        1 | 2 => Ok(&SET_V1),
        3 => Ok(&SET_V2),
        4 | 5 => Ok(&SET_V3),
        _ => Err(SyncError::UnknownProtocol { code, level }),
    }
}
