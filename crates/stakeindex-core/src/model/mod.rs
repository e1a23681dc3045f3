//! The relational model maintained by the sync core.

pub mod account;
pub mod baker_cycle;
pub mod block;
pub mod cycle;
pub mod operations;
pub mod protocol;
pub mod rights;
pub mod snapshot;
pub mod staking;

pub use account::Account;
pub use baker_cycle::BakerCycle;
pub use block::{Block, BlockEvents};
pub use cycle::Cycle;
pub use operations::{
    AttestationRewardOperation, AutostakingOperation, DoubleSigningKind, DoubleSigningOperation,
    NonceRevelationOperation, StakingAction, VdfRevelationOperation,
};
pub use protocol::Protocol;
pub use rights::{AttestingRight, BakingRight};
pub use snapshot::SnapshotBalance;
pub use staking::{StakingUpdate, StakingUpdateKind, StakingUpdateSource, UnstakeRequest};
