//! Raw JSON shapes returned by the node.
//!
//! These are the untrusted inbound types: headers, metadata (with the
//! balance-update audit trail kept as raw JSON until the strict IR parse),
//! rights, issuance forecasts, and raw-context staking views. Field-level
//! validation happens in `stakeindex-core`; here we only pin the envelope.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use stakeindex_core::SyncError;

/// The node encodes most amounts as decimal strings; accept integers too.
pub fn de_i64_str<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }
    match Raw::deserialize(de)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub hash: String,
    pub header: RawHeader,
    pub metadata: RawMetadata,
    /// Anonymous operations included in the block (evidence, revelations).
    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHeader {
    pub level: i64,
    /// Protocol ordinal — the registry keys strictly by this code.
    pub proto: i32,
    pub predecessor: String,
    /// Seconds since epoch.
    pub timestamp: i64,
    pub payload_round: i32,
    /// Hex components; the consensus round is the big-endian tail element.
    pub fitness: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetadata {
    pub protocol: String,
    pub next_protocol: String,
    /// Payload proposer (earns the base reward).
    pub proposer: String,
    /// Block producer (earns the bonus).
    pub baker: String,
    /// The audit trail, parsed strictly into the IR by the sync core.
    #[serde(default)]
    pub balance_updates: Vec<Value>,
    /// Bakers deactivated by this block.
    #[serde(default)]
    pub deactivated: Vec<String>,
    /// Aggregated attestation outcome for the previous level.
    #[serde(default)]
    pub attestations: Vec<RawAttestation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttestation {
    pub delegate: String,
    pub slots: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOperation {
    pub hash: String,
    pub contents: RawOperationContents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOperationContents {
    DoubleBakingEvidence { offender: String, accused_level: i64 },
    DoubleAttestationEvidence { offender: String, accused_level: i64 },
    DoublePreattestationEvidence { offender: String, accused_level: i64 },
    SeedNonceRevelation { revealed_level: i64 },
    VdfRevelation,
}

// ─── Rights ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBakingRight {
    pub level: i64,
    pub round: i32,
    pub delegate: String,
}

/// One level's attesting rights: `{level, delegates: [{delegate, power}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttestingRight {
    pub level: i64,
    pub delegates: Vec<RawDelegatePower>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDelegatePower {
    pub delegate: String,
    #[serde(deserialize_with = "de_i64_str")]
    pub attestation_power: i64,
}

impl RawAttestingRight {
    pub fn total_power(&self) -> i64 {
        self.delegates.iter().map(|d| d.attestation_power).sum()
    }
}

// ─── Issuance ─────────────────────────────────────────────────────────────────

/// One entry of the issuance-forecast endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssuance {
    pub cycle: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub baking_reward_fixed_portion: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub baking_reward_bonus_per_slot: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub attesting_reward_per_slot: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub seed_nonce_revelation_tip: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub vdf_revelation_tip: i64,
    #[serde(default, deserialize_with = "de_i64_str")]
    pub liquidity_baking_subsidy: i64,
}

// ─── Raw staking context ──────────────────────────────────────────────────────

/// One per-cycle unstaked-deposit total from the raw context, the node's
/// authoritative view used by the slashing cross-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUnstakedDeposit {
    pub cycle: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub deposit: i64,
}

/// A staker's pending unstake requests as the node reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUnstakeRequest {
    pub cycle: i64,
    #[serde(deserialize_with = "de_i64_str")]
    pub amount: i64,
}

/// Maps a transport failure to the retryable error class.
pub fn rpc_error(context: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Rpc(format!("{context}: {err}"))
}
