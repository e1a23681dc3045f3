//! Strongly-typed intermediate representation of the node's balance-update
//! audit trail.
//!
//! The node attaches a `balance_updates` array to every block's metadata. It
//! is the single source of truth for consensus-level accounting, so it is
//! parsed exactly once, strictly, into this IR before any commit runs.
//! Anything with an unexpected shape is a fatal integrity violation — the
//! commits then only see well-formed entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

// ─── Tagged union ─────────────────────────────────────────────────────────────

/// The `kind` tag of a balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    /// A spendable contract balance changed.
    Contract,
    /// A frozen balance changed (deposits or unstaked deposits).
    Freezer,
    /// Value was created.
    Minted,
    /// Value was destroyed.
    Burned,
    /// Block-fee accumulator.
    Accumulator,
}

/// The `category` tag, where present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateCategory {
    Deposits,
    UnstakedDeposits,
    BakingRewards,
    BakingBonuses,
    AttestingRewards,
    LostAttestingRewards,
    NonceRevelationRewards,
    VdfRevelationRewards,
    Punishments,
    BlockFees,
    Subsidy,
}

impl UpdateCategory {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "deposits" => Self::Deposits,
            "unstaked_deposits" => Self::UnstakedDeposits,
            "baking rewards" => Self::BakingRewards,
            "baking bonuses" => Self::BakingBonuses,
            "attesting rewards" => Self::AttestingRewards,
            "lost attesting rewards" => Self::LostAttestingRewards,
            "nonce revelation rewards" => Self::NonceRevelationRewards,
            "vdf revelation rewards" => Self::VdfRevelationRewards,
            "punishments" => Self::Punishments,
            "block fees" => Self::BlockFees,
            "subsidy" => Self::Subsidy,
            _ => return None,
        })
    }
}

/// Where an update originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Regular block application.
    Block,
    /// Protocol migration.
    Migration,
    /// Protocol subsidy.
    Subsidy,
    /// A penalty resolved some cycles after the offending operation.
    DelayedOperation,
}

/// The staker a freezer entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Staker {
    /// The baker's own frozen funds.
    BakerOwn { baker: String },
    /// The baker's edge over its external stake pool.
    BakerEdge { baker: String },
    /// The shared external stake pool of a baker.
    Shared { delegate: String },
    /// A single staker's pending unstaked funds.
    Single { contract: String, delegate: String },
}

impl Staker {
    /// The baker the frozen funds are accounted under.
    pub fn baker(&self) -> &str {
        match self {
            Self::BakerOwn { baker } | Self::BakerEdge { baker } => baker,
            Self::Shared { delegate } | Self::Single { delegate, .. } => delegate,
        }
    }
}

/// One parsed balance update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub kind: UpdateKind,
    pub category: Option<UpdateCategory>,
    /// Contract address for `Contract` entries, loser address for `Burned`.
    pub contract: Option<String>,
    /// Owner of the frozen funds for `Freezer` entries.
    pub staker: Option<Staker>,
    /// Cycle tag on `unstaked_deposits` entries.
    pub cycle: Option<i64>,
    pub change: i64,
    pub origin: UpdateOrigin,
    /// Operation hash carried by delayed (slashing) updates.
    pub delayed_op_hash: Option<String>,
}

impl BalanceUpdate {
    /// Returns `true` if this entry is part of a delayed slashing settlement.
    pub fn is_delayed(&self) -> bool {
        self.origin == UpdateOrigin::DelayedOperation
    }

    /// Parse a single raw JSON balance update. Any unexpected shape is fatal.
    pub fn parse(raw: &Value, level: i64) -> Result<Self, SyncError> {
        let bad = |reason: String| SyncError::integrity(level, reason);

        let kind = match raw["kind"].as_str() {
            Some("contract") => UpdateKind::Contract,
            Some("freezer") => UpdateKind::Freezer,
            Some("minted") => UpdateKind::Minted,
            Some("burned") => UpdateKind::Burned,
            Some("accumulator") => UpdateKind::Accumulator,
            other => return Err(bad(format!("unknown balance update kind {other:?}"))),
        };

        let change = parse_change(&raw["change"])
            .ok_or_else(|| bad(format!("missing or non-integer change in {raw}")))?;

        let category = match raw["category"].as_str() {
            None => None,
            Some(s) => Some(
                UpdateCategory::parse(s)
                    .ok_or_else(|| bad(format!("unknown balance update category {s:?}")))?,
            ),
        };

        // Categories are mandatory for every kind except `contract`.
        if category.is_none() && kind != UpdateKind::Contract {
            return Err(bad(format!("missing category on {kind:?} update")));
        }

        let staker = match &raw["staker"] {
            Value::Null => None,
            v => Some(parse_staker(v).ok_or_else(|| bad(format!("malformed staker {v}")))?),
        };
        if kind == UpdateKind::Freezer && staker.is_none() {
            return Err(bad("freezer update without staker".to_string()));
        }

        let contract = raw["contract"].as_str().map(str::to_string);
        if kind == UpdateKind::Contract && contract.is_none() {
            return Err(bad("contract update without contract address".to_string()));
        }

        let cycle = raw["cycle"].as_i64();
        if category == Some(UpdateCategory::UnstakedDeposits) && cycle.is_none() {
            return Err(bad("unstaked_deposits update without cycle".to_string()));
        }

        let origin = match raw["origin"].as_str() {
            Some("block") | None => UpdateOrigin::Block,
            Some("migration") => UpdateOrigin::Migration,
            Some("subsidy") => UpdateOrigin::Subsidy,
            Some("delayed_operation") => UpdateOrigin::DelayedOperation,
            Some(other) => return Err(bad(format!("unknown balance update origin {other:?}"))),
        };

        let delayed_op_hash = raw["delayed_operation_hash"].as_str().map(str::to_string);
        if origin == UpdateOrigin::DelayedOperation && delayed_op_hash.is_none() {
            return Err(bad("delayed update without operation hash".to_string()));
        }

        Ok(Self {
            kind,
            category,
            contract,
            staker,
            cycle,
            change,
            origin,
            delayed_op_hash,
        })
    }

    /// Parse a whole `balance_updates` array, preserving order.
    pub fn parse_all(raw: &[Value], level: i64) -> Result<Vec<Self>, SyncError> {
        raw.iter().map(|v| Self::parse(v, level)).collect()
    }
}

/// The node encodes `change` as a decimal string; accept a bare integer too.
fn parse_change(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn parse_staker(v: &Value) -> Option<Staker> {
    let obj = v.as_object()?;
    let get = |k: &str| obj.get(k).and_then(Value::as_str).map(str::to_string);
    match (get("baker"), get("baker_edge"), get("contract"), get("delegate")) {
        (Some(baker), None, None, None) => Some(Staker::BakerOwn { baker }),
        (None, Some(baker), None, None) => Some(Staker::BakerEdge { baker }),
        (None, None, None, Some(delegate)) => Some(Staker::Shared { delegate }),
        (None, None, Some(contract), Some(delegate)) => {
            Some(Staker::Single { contract, delegate })
        }
        _ => None,
    }
}

// ─── UpdateTrail ──────────────────────────────────────────────────────────────

/// The parsed audit trail of one block, with per-entry consumption tracking.
///
/// Each commit consumes the entries it accounts for. After the full commit
/// sequence, any unconsumed entry means a balance movement the model did not
/// account for — fatal.
#[derive(Debug, Clone)]
pub struct UpdateTrail {
    updates: Vec<BalanceUpdate>,
    consumed: Vec<bool>,
}

impl UpdateTrail {
    pub fn new(updates: Vec<BalanceUpdate>) -> Self {
        let consumed = vec![false; updates.len()];
        Self { updates, consumed }
    }

    /// Parse a raw `balance_updates` array into a fresh trail.
    pub fn parse(raw: &[Value], level: i64) -> Result<Self, SyncError> {
        Ok(Self::new(BalanceUpdate::parse_all(raw, level)?))
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn get(&self, index: usize) -> &BalanceUpdate {
        &self.updates[index]
    }

    pub fn is_consumed(&self, index: usize) -> bool {
        self.consumed[index]
    }

    pub fn consume(&mut self, index: usize) {
        debug_assert!(!self.consumed[index], "balance update consumed twice");
        self.consumed[index] = true;
    }

    /// Indexes of all entries not yet consumed, in trail order.
    pub fn unconsumed(&self) -> Vec<usize> {
        (0..self.updates.len())
            .filter(|&i| !self.consumed[i])
            .collect()
    }

    /// The first unconsumed index at or after `from`, if any.
    pub fn next_unconsumed(&self, from: usize) -> Option<usize> {
        (from..self.updates.len()).find(|&i| !self.consumed[i])
    }

    /// Fatal unless every entry has been consumed by some commit.
    pub fn ensure_exhausted(&self, level: i64) -> Result<(), SyncError> {
        match self.unconsumed().first() {
            None => Ok(()),
            Some(&i) => Err(SyncError::integrity(
                level,
                format!("unaccounted balance update at index {i}: {:?}", self.updates[i]),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minted_reward() {
        let raw = json!({
            "kind": "minted",
            "category": "baking rewards",
            "change": "-5000",
            "origin": "block"
        });
        let u = BalanceUpdate::parse(&raw, 100).unwrap();
        assert_eq!(u.kind, UpdateKind::Minted);
        assert_eq!(u.category, Some(UpdateCategory::BakingRewards));
        assert_eq!(u.change, -5000);
        assert_eq!(u.origin, UpdateOrigin::Block);
    }

    #[test]
    fn parses_freezer_deposit_with_staker() {
        let raw = json!({
            "kind": "freezer",
            "category": "deposits",
            "staker": { "baker": "baker1" },
            "change": "5000",
            "origin": "block"
        });
        let u = BalanceUpdate::parse(&raw, 100).unwrap();
        assert_eq!(u.kind, UpdateKind::Freezer);
        assert_eq!(u.staker, Some(Staker::BakerOwn { baker: "baker1".into() }));
    }

    #[test]
    fn parses_delayed_punishment() {
        let raw = json!({
            "kind": "freezer",
            "category": "deposits",
            "staker": { "baker": "baker1" },
            "change": "-777",
            "origin": "delayed_operation",
            "delayed_operation_hash": "op123"
        });
        let u = BalanceUpdate::parse(&raw, 100).unwrap();
        assert!(u.is_delayed());
        assert_eq!(u.delayed_op_hash.as_deref(), Some("op123"));
    }

    #[test]
    fn unknown_kind_is_fatal() {
        let raw = json!({ "kind": "teleport", "change": "1" });
        let err = BalanceUpdate::parse(&raw, 42).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn freezer_without_staker_is_fatal() {
        let raw = json!({ "kind": "freezer", "category": "deposits", "change": "1" });
        assert!(BalanceUpdate::parse(&raw, 42).is_err());
    }

    #[test]
    fn delayed_without_hash_is_fatal() {
        let raw = json!({
            "kind": "burned",
            "category": "punishments",
            "change": "9",
            "origin": "delayed_operation"
        });
        assert!(BalanceUpdate::parse(&raw, 42).is_err());
    }

    #[test]
    fn unstaked_deposits_require_cycle() {
        let raw = json!({
            "kind": "freezer",
            "category": "unstaked_deposits",
            "staker": { "contract": "staker1", "delegate": "baker1" },
            "change": "-10"
        });
        assert!(BalanceUpdate::parse(&raw, 42).is_err());
    }

    #[test]
    fn trail_tracks_consumption() {
        let raw = vec![
            json!({ "kind": "minted", "category": "baking rewards", "change": "-5" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "5" }),
        ];
        let mut trail = UpdateTrail::parse(&raw, 10).unwrap();
        assert_eq!(trail.unconsumed(), vec![0, 1]);
        trail.consume(0);
        assert_eq!(trail.unconsumed(), vec![1]);
        assert!(trail.ensure_exhausted(10).is_err());
        trail.consume(1);
        trail.ensure_exhausted(10).unwrap();
    }
}
