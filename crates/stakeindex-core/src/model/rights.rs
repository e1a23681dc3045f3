//! Baking and attesting rights, resolved to account ids and stored per cycle.

use serde::{Deserialize, Serialize};

/// One baking right (round-ordered within a level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakingRight {
    pub level: i64,
    pub round: i32,
    pub baker_id: i64,
}

/// One attesting right: `slots` attestation slots at `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestingRight {
    pub level: i64,
    pub baker_id: i64,
    pub slots: i64,
}
