//! stakeindex-rpc — chain-node access for the sync core.
//!
//! Provides the [`NodeRpc`] trait (all reads, all idempotent), its HTTP
//! implementation, the raw JSON types, and the two-tier rights loader with
//! its bulk → throttled-fallback degrade strategy.

pub mod client;
pub mod rights;
pub mod types;

pub use client::{NodeClient, NodeRpc};
pub use rights::{RightsConfig, RightsLoader};
pub use types::{
    RawAttestation, RawAttestingRight, RawBakingRight, RawBlock, RawHeader, RawIssuance,
    RawMetadata, RawOperation, RawOperationContents, RawUnstakeRequest, RawUnstakedDeposit,
};
