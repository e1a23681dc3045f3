//! Node RPC client: the `NodeRpc` trait and its HTTP implementation.
//!
//! Every method is an idempotent read. Transport failures surface as the
//! retryable `SyncError::Rpc` class; the caller decides whether to retry the
//! fetch (rights loader) or the whole block attempt (sync loop).

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use stakeindex_core::SyncError;

use crate::types::{
    rpc_error, RawAttestingRight, RawBakingRight, RawBlock, RawIssuance, RawUnstakeRequest,
    RawUnstakedDeposit,
};

/// Read access to a chain node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Current head level.
    async fn head_level(&self) -> Result<i64, SyncError>;

    /// Full block (header + metadata + operations) at `level`.
    async fn block(&self, level: i64) -> Result<RawBlock, SyncError>;

    /// Baking rights for a whole cycle (round 0 only), queried at
    /// `reference_level`.
    async fn baking_rights_for_cycle(
        &self,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError>;

    /// Baking rights (round 0) for a single level.
    async fn baking_rights_for_level(
        &self,
        reference_level: i64,
        level: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError>;

    /// Attesting rights for a whole cycle, queried at `reference_level`.
    async fn attesting_rights_for_cycle(
        &self,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError>;

    /// Attesting rights for a single level.
    async fn attesting_rights_for_level(
        &self,
        reference_level: i64,
        level: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError>;

    /// Issuance forecast visible at `level` (one entry per forecast cycle).
    async fn expected_issuance(&self, level: i64) -> Result<Vec<RawIssuance>, SyncError>;

    /// Node's view of a baker's per-cycle unstaked frozen deposits at `level`.
    async fn unstaked_frozen_deposits(
        &self,
        level: i64,
        baker: &str,
    ) -> Result<Vec<RawUnstakedDeposit>, SyncError>;

    /// Node's view of a staker's pending unstake requests at `level`.
    /// `None` when the context for `level` is unavailable (pruned).
    async fn unstake_requests(
        &self,
        level: i64,
        contract: &str,
    ) -> Result<Option<Vec<RawUnstakeRequest>>, SyncError>;
}

/// HTTP implementation over the node's REST interface.
pub struct NodeClient {
    base_url: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = format!("{}{path}", self.base_url);
        tracing::trace!(%url, "node RPC request");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| rpc_error(path, e))?;
        if !resp.status().is_success() {
            return Err(SyncError::Rpc(format!("{path}: HTTP {}", resp.status())));
        }
        resp.json::<T>().await.map_err(|e| rpc_error(path, e))
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn head_level(&self) -> Result<i64, SyncError> {
        #[derive(serde::Deserialize)]
        struct Header {
            level: i64,
        }
        let header: Header = self.get("/chains/main/blocks/head/header").await?;
        Ok(header.level)
    }

    async fn block(&self, level: i64) -> Result<RawBlock, SyncError> {
        self.get(&format!("/chains/main/blocks/{level}")).await
    }

    async fn baking_rights_for_cycle(
        &self,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{reference_level}/helpers/baking_rights?cycle={cycle}&max_round=0"
        ))
        .await
    }

    async fn baking_rights_for_level(
        &self,
        reference_level: i64,
        level: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{reference_level}/helpers/baking_rights?level={level}&max_round=0"
        ))
        .await
    }

    async fn attesting_rights_for_cycle(
        &self,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{reference_level}/helpers/attestation_rights?cycle={cycle}"
        ))
        .await
    }

    async fn attesting_rights_for_level(
        &self,
        reference_level: i64,
        level: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{reference_level}/helpers/attestation_rights?level={level}"
        ))
        .await
    }

    async fn expected_issuance(&self, level: i64) -> Result<Vec<RawIssuance>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{level}/context/issuance/expected_issuance"
        ))
        .await
    }

    async fn unstaked_frozen_deposits(
        &self,
        level: i64,
        baker: &str,
    ) -> Result<Vec<RawUnstakedDeposit>, SyncError> {
        self.get(&format!(
            "/chains/main/blocks/{level}/context/delegates/{baker}/unstaked_frozen_deposits"
        ))
        .await
    }

    async fn unstake_requests(
        &self,
        level: i64,
        contract: &str,
    ) -> Result<Option<Vec<RawUnstakeRequest>>, SyncError> {
        #[derive(serde::Deserialize)]
        struct Requests {
            #[serde(default)]
            unfinalizable: Option<Unfinalizable>,
        }
        #[derive(serde::Deserialize)]
        struct Unfinalizable {
            #[serde(default)]
            requests: Vec<RawUnstakeRequest>,
        }
        let resp: Option<Requests> = self
            .get(&format!(
                "/chains/main/blocks/{level}/context/contracts/{contract}/unstake_requests"
            ))
            .await?;
        Ok(resp.map(|r| r.unfinalizable.map(|u| u.requests).unwrap_or_default()))
    }
}
