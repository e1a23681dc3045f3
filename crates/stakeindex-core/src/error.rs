//! Error types for the sync pipeline.
//!
//! Two classes, and the distinction is load-bearing:
//! - integrity violations are fatal — the sync loop must stop rather than
//!   silently mis-account value;
//! - transient I/O failures are retried with bounded attempts, and escalate
//!   to a fatal abort once the bound is exceeded.

use thiserror::Error;

/// Errors that can occur while applying or reverting blocks.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {elapsed_ms} ms: {context}")]
    RpcTimeout { context: String, elapsed_ms: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("integrity violation at level {level}: {reason}")]
    Integrity { level: i64, reason: String },

    #[error(
        "rights fetch for cycle {cycle} aborted after {failures} consecutive failures: {reason}"
    )]
    RightsAborted {
        cycle: i64,
        failures: u32,
        reason: String,
    },

    #[error("unknown protocol code {code} at level {level}")]
    UnknownProtocol { code: i32, level: i64 },

    #[error("revert failed at level {level}: {reason}")]
    Revert { level: i64, reason: String },
}

impl SyncError {
    /// Shorthand for an integrity violation at a given level.
    pub fn integrity(level: i64, reason: impl Into<String>) -> Self {
        Self::Integrity {
            level,
            reason: reason.into(),
        }
    }

    /// Shorthand for a revert failure at a given level.
    pub fn revert(level: i64, reason: impl Into<String>) -> Self {
        Self::Revert {
            level,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error must stop the sync loop outright.
    ///
    /// Only transport-level failures are retryable; everything else means the
    /// local model can no longer be trusted to match the chain.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rpc(_) | Self::RpcTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!SyncError::Rpc("connection reset".into()).is_fatal());
        assert!(!SyncError::RpcTimeout {
            context: "rights".into(),
            elapsed_ms: 10_000,
        }
        .is_fatal());
    }

    #[test]
    fn integrity_errors_are_fatal() {
        assert!(SyncError::integrity(100, "unexpected balance update").is_fatal());
        assert!(SyncError::revert(100, "ledger row missing").is_fatal());
        assert!(SyncError::UnknownProtocol { code: 99, level: 5 }.is_fatal());
    }
}
