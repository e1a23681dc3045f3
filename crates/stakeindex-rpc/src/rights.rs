//! Two-tier degrade-and-retry loading of a whole cycle's rights.
//!
//! Nodes degrade non-deterministically under bulk load, so the loader first
//! asks for the whole cycle in one request with a long timeout, and falls
//! back to throttled level-by-level fetching when that fails — including when
//! the bulk response fails the total-slot integrity check. The fallback
//! trades latency for reliability; its accumulated result is validated
//! against the same invariant before being returned.

use std::time::Duration;

use tokio::time::{sleep, timeout};

use stakeindex_core::model::Protocol;
use stakeindex_core::SyncError;

use crate::client::NodeRpc;
use crate::types::{RawAttestingRight, RawBakingRight};

/// Timeouts and retry bounds for rights loading.
#[derive(Debug, Clone)]
pub struct RightsConfig {
    /// Timeout for the whole-cycle bulk request.
    pub bulk_timeout: Duration,
    /// Timeout for one level in fallback mode.
    pub level_timeout: Duration,
    /// Delay before retrying a failed level.
    pub retry_delay: Duration,
    /// Consecutive level failures after which the whole fetch aborts.
    pub max_consecutive_failures: u32,
}

impl Default for RightsConfig {
    fn default() -> Self {
        Self {
            bulk_timeout: Duration::from_secs(30 * 60),
            level_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            max_consecutive_failures: 30,
        }
    }
}

/// Loads a cycle's rights with the bulk → throttled-fallback strategy.
pub struct RightsLoader<'a, C: NodeRpc> {
    client: &'a C,
    config: RightsConfig,
}

impl<'a, C: NodeRpc> RightsLoader<'a, C> {
    pub fn new(client: &'a C, config: RightsConfig) -> Self {
        Self { client, config }
    }

    /// Attesting rights for `cycle`, queried at `reference_level`.
    pub async fn attesting_rights(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError> {
        match self.bulk_attesting(proto, reference_level, cycle).await {
            Ok(rights) => return Ok(rights),
            Err(err) => {
                tracing::warn!(cycle, %err, "bulk attesting-rights fetch failed, falling back");
            }
        }

        let rights = self
            .throttled_attesting(proto, reference_level, cycle)
            .await?;
        validate_attesting(proto, cycle, &rights)?;
        Ok(rights)
    }

    /// Baking rights (round 0) for `cycle`, queried at `reference_level`.
    pub async fn baking_rights(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError> {
        match self.bulk_baking(proto, reference_level, cycle).await {
            Ok(rights) => return Ok(rights),
            Err(err) => {
                tracing::warn!(cycle, %err, "bulk baking-rights fetch failed, falling back");
            }
        }

        let rights = self.throttled_baking(proto, reference_level, cycle).await?;
        validate_baking(proto, cycle, &rights)?;
        Ok(rights)
    }

    async fn bulk_attesting(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError> {
        let rights = timeout(
            self.config.bulk_timeout,
            self.client.attesting_rights_for_cycle(reference_level, cycle),
        )
        .await
        .map_err(|_| SyncError::RpcTimeout {
            context: format!("bulk attesting rights for cycle {cycle}"),
            elapsed_ms: self.config.bulk_timeout.as_millis() as u64,
        })??;
        validate_attesting(proto, cycle, &rights)?;
        Ok(rights)
    }

    async fn bulk_baking(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError> {
        let rights = timeout(
            self.config.bulk_timeout,
            self.client.baking_rights_for_cycle(reference_level, cycle),
        )
        .await
        .map_err(|_| SyncError::RpcTimeout {
            context: format!("bulk baking rights for cycle {cycle}"),
            elapsed_ms: self.config.bulk_timeout.as_millis() as u64,
        })??;
        validate_baking(proto, cycle, &rights)?;
        Ok(rights)
    }

    async fn throttled_attesting(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawAttestingRight>, SyncError> {
        let mut rights = Vec::with_capacity(proto.blocks_per_cycle as usize);
        let mut failures = 0u32;
        let mut level = proto.cycle_start(cycle);
        let last = proto.cycle_end(cycle);

        while level <= last {
            let attempt = timeout(
                self.config.level_timeout,
                self.client.attesting_rights_for_level(reference_level, level),
            )
            .await;
            match attempt {
                Ok(Ok(mut chunk)) => {
                    failures = 0;
                    rights.append(&mut chunk);
                    level += 1;
                }
                Ok(Err(err)) => {
                    failures += 1;
                    self.note_failure(cycle, level, failures, err.to_string())?;
                    sleep(self.config.retry_delay).await;
                }
                Err(_) => {
                    failures += 1;
                    self.note_failure(cycle, level, failures, "timeout".to_string())?;
                    sleep(self.config.retry_delay).await;
                }
            }
        }
        Ok(rights)
    }

    async fn throttled_baking(
        &self,
        proto: &Protocol,
        reference_level: i64,
        cycle: i64,
    ) -> Result<Vec<RawBakingRight>, SyncError> {
        let mut rights = Vec::with_capacity(proto.blocks_per_cycle as usize);
        let mut failures = 0u32;
        let mut level = proto.cycle_start(cycle);
        let last = proto.cycle_end(cycle);

        while level <= last {
            let attempt = timeout(
                self.config.level_timeout,
                self.client.baking_rights_for_level(reference_level, level),
            )
            .await;
            match attempt {
                Ok(Ok(mut chunk)) => {
                    failures = 0;
                    rights.append(&mut chunk);
                    level += 1;
                }
                Ok(Err(err)) => {
                    failures += 1;
                    self.note_failure(cycle, level, failures, err.to_string())?;
                    sleep(self.config.retry_delay).await;
                }
                Err(_) => {
                    failures += 1;
                    self.note_failure(cycle, level, failures, "timeout".to_string())?;
                    sleep(self.config.retry_delay).await;
                }
            }
        }
        Ok(rights)
    }

    /// Count a level failure: abort past the bound, otherwise wait and let
    /// the caller retry the same level.
    fn note_failure(
        &self,
        cycle: i64,
        level: i64,
        failures: u32,
        reason: String,
    ) -> Result<(), SyncError> {
        if failures >= self.config.max_consecutive_failures {
            return Err(SyncError::RightsAborted {
                cycle,
                failures,
                reason,
            });
        }
        tracing::debug!(cycle, level, failures, %reason, "level rights fetch failed, retrying");
        Ok(())
    }
}

fn validate_attesting(
    proto: &Protocol,
    cycle: i64,
    rights: &[RawAttestingRight],
) -> Result<(), SyncError> {
    let total: i64 = rights.iter().map(RawAttestingRight::total_power).sum();
    let expected = proto.slots_per_cycle();
    if total != expected {
        return Err(SyncError::integrity(
            proto.cycle_start(cycle),
            format!("attesting rights for cycle {cycle}: {total} slots, expected {expected}"),
        ));
    }
    Ok(())
}

fn validate_baking(
    proto: &Protocol,
    cycle: i64,
    rights: &[RawBakingRight],
) -> Result<(), SyncError> {
    let round0 = rights.iter().filter(|r| r.round == 0).count() as i64;
    if round0 != proto.blocks_per_cycle {
        return Err(SyncError::integrity(
            proto.cycle_start(cycle),
            format!(
                "baking rights for cycle {cycle}: {round0} round-0 rights, expected {}",
                proto.blocks_per_cycle
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::{RawBlock, RawDelegatePower, RawIssuance, RawUnstakeRequest, RawUnstakedDeposit};

    fn proto() -> Protocol {
        Protocol {
            code: 1,
            hash: "PtTest1".into(),
            first_level: 1,
            first_cycle: 0,
            blocks_per_cycle: 4,
            blocks_per_snapshot: 2,
            attesters_per_block: 8,
            consensus_threshold: 6,
            consensus_rights_delay: 2,
            minimal_stake: 6_000,
            minimal_frozen_stake: 600,
            max_delegated_over_frozen: 9,
            max_external_over_own: 5,
            grace_cycles: 3,
            unstake_cooldown_cycles: 4,
        }
    }

    fn level_right(level: i64, power: i64) -> RawAttestingRight {
        RawAttestingRight {
            level,
            delegates: vec![RawDelegatePower {
                delegate: "baker1".into(),
                attestation_power: power,
            }],
        }
    }

    /// Mock node: bulk requests fail `bulk_failures` times; level requests
    /// fail `level_failures` times each before succeeding.
    struct MockNode {
        bulk_ok: bool,
        bulk_short: bool,
        level_failures_before_success: u32,
        level_calls: AtomicU32,
    }

    impl MockNode {
        fn new(bulk_ok: bool) -> Self {
            Self {
                bulk_ok,
                bulk_short: false,
                level_failures_before_success: 0,
                level_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NodeRpc for MockNode {
        async fn head_level(&self) -> Result<i64, SyncError> {
            Ok(100)
        }
        async fn block(&self, _level: i64) -> Result<RawBlock, SyncError> {
            Err(SyncError::Rpc("not implemented".into()))
        }
        async fn baking_rights_for_cycle(
            &self,
            _reference_level: i64,
            _cycle: i64,
        ) -> Result<Vec<RawBakingRight>, SyncError> {
            Err(SyncError::Rpc("bulk unavailable".into()))
        }
        async fn baking_rights_for_level(
            &self,
            _reference_level: i64,
            level: i64,
        ) -> Result<Vec<RawBakingRight>, SyncError> {
            Ok(vec![RawBakingRight {
                level,
                round: 0,
                delegate: "baker1".into(),
            }])
        }
        async fn attesting_rights_for_cycle(
            &self,
            _reference_level: i64,
            cycle: i64,
        ) -> Result<Vec<RawAttestingRight>, SyncError> {
            if !self.bulk_ok {
                return Err(SyncError::Rpc("bulk unavailable".into()));
            }
            let p = proto();
            let start = p.cycle_start(cycle);
            let slots = if self.bulk_short { 7 } else { 8 };
            Ok((start..start + p.blocks_per_cycle)
                .map(|l| level_right(l, slots))
                .collect())
        }
        async fn attesting_rights_for_level(
            &self,
            _reference_level: i64,
            level: i64,
        ) -> Result<Vec<RawAttestingRight>, SyncError> {
            let calls = self.level_calls.fetch_add(1, Ordering::Relaxed);
            if calls < self.level_failures_before_success {
                return Err(SyncError::Rpc("level unavailable".into()));
            }
            Ok(vec![level_right(level, 8)])
        }
        async fn expected_issuance(&self, _level: i64) -> Result<Vec<RawIssuance>, SyncError> {
            Ok(vec![])
        }
        async fn unstaked_frozen_deposits(
            &self,
            _level: i64,
            _baker: &str,
        ) -> Result<Vec<RawUnstakedDeposit>, SyncError> {
            Ok(vec![])
        }
        async fn unstake_requests(
            &self,
            _level: i64,
            _contract: &str,
        ) -> Result<Option<Vec<RawUnstakeRequest>>, SyncError> {
            Ok(Some(vec![]))
        }
    }

    #[tokio::test]
    async fn bulk_mode_succeeds() {
        let node = MockNode::new(true);
        let loader = RightsLoader::new(&node, RightsConfig::default());
        let rights = loader.attesting_rights(&proto(), 1, 0).await.unwrap();
        assert_eq!(rights.len(), 4);
        assert_eq!(node.level_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_mismatch_triggers_fallback() {
        let node = MockNode {
            bulk_short: true,
            ..MockNode::new(true)
        };
        let loader = RightsLoader::new(&node, RightsConfig::default());
        // Bulk returns 7 slots per level (integrity fault) → fallback fills in.
        let rights = loader.attesting_rights(&proto(), 1, 0).await.unwrap();
        assert_eq!(rights.len(), 4);
        assert_eq!(node.level_calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_retries_then_recovers() {
        let node = MockNode {
            level_failures_before_success: 3,
            ..MockNode::new(false)
        };
        let loader = RightsLoader::new(&node, RightsConfig::default());
        let rights = loader.attesting_rights(&proto(), 1, 0).await.unwrap();
        assert_eq!(rights.len(), 4);
        // 3 failures then 4 successes
        assert_eq!(node.level_calls.load(Ordering::Relaxed), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_aborts_after_bound() {
        let node = MockNode {
            level_failures_before_success: u32::MAX,
            ..MockNode::new(false)
        };
        let loader = RightsLoader::new(&node, RightsConfig::default());
        let err = loader.attesting_rights(&proto(), 1, 0).await.unwrap_err();
        match err {
            SyncError::RightsAborted { cycle, failures, .. } => {
                assert_eq!(cycle, 0);
                assert_eq!(failures, 30);
            }
            other => panic!("expected RightsAborted, got {other:?}"),
        }
    }
}
