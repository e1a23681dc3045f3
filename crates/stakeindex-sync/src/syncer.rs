//! The sync loop: prefetch, apply, revert, reorg recovery.
//!
//! Block processing is split in two phases. `prepare` is async and resolves
//! every RPC dependency of a block up front; `apply` is synchronous and
//! either runs the full commit sequence or fails before mutating anything
//! the node could contradict. Revert mirrors apply exactly, reading its
//! inputs from the stored block row.

use std::collections::HashMap;
use std::time::Duration;

use stakeindex_core::model::BlockEvents;
use stakeindex_core::{BalanceUpdate, SyncError, SyncSession, UpdateTrail};
use stakeindex_rpc::{NodeRpc, RawBlock, RightsConfig, RightsLoader};
use stakeindex_storage::CursorManager;

use crate::data::{BlockData, Issuance};
use crate::registry;

/// Sync loop tuning.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Idle delay between head polls.
    pub poll_interval: Duration,
    pub rights: RightsConfig,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            rights: RightsConfig::default(),
        }
    }
}

/// Drives one chain forward (and, on reorgs, backward) block by block.
pub struct Syncer<C: NodeRpc> {
    pub session: SyncSession,
    client: C,
    config: SyncerConfig,
    cursor: Option<CursorManager>,
}

impl<C: NodeRpc> Syncer<C> {
    pub fn new(client: C, session: SyncSession, config: SyncerConfig) -> Self {
        Self {
            session,
            client,
            config,
            cursor: None,
        }
    }

    /// Attach a cursor store; progress is then checkpointed periodically.
    pub fn with_cursor(mut self, cursor: CursorManager) -> Self {
        self.cursor = cursor.into();
        self
    }

    // ─── Prepare ──────────────────────────────────────────────────────────────

    /// Resolve everything the commit sequence will need for `raw`, without
    /// touching the session.
    pub async fn prepare(&self, raw: RawBlock) -> Result<BlockData, SyncError> {
        let level = raw.header.level;
        let proto = self
            .session
            .protocol_by_code(raw.header.proto, level)?
            .clone();
        let updates = BalanceUpdate::parse_all(&raw.metadata.balance_updates, level)?;
        let mut data = BlockData::new(raw, updates);

        if proto.is_cycle_start(level) {
            let future = proto.cycle_of(level) + proto.consensus_rights_delay;
            let forecast = self.client.expected_issuance(level).await?;
            data.issuance = forecast
                .iter()
                .find(|i| i.cycle == future)
                .map(Issuance::from);
            if data.issuance.is_none() {
                return Err(SyncError::integrity(
                    level,
                    format!("node issuance forecast does not cover cycle {future}"),
                ));
            }
            let loader = RightsLoader::new(&self.client, self.config.rights.clone());
            let (baking, attesting) = futures::future::try_join(
                loader.baking_rights(&proto, level, future),
                loader.attesting_rights(&proto, level, future),
            )
            .await?;
            data.future_baking_rights = baking;
            data.future_attesting_rights = attesting;
        }

        self.prefetch_slashing_context(level, &mut data).await?;
        Ok(data)
    }

    /// For blocks that settle accusations, fetch the node's post-block view
    /// of every affected unstaked pool before anything is applied.
    async fn prefetch_slashing_context(
        &self,
        level: i64,
        data: &mut BlockData,
    ) -> Result<(), SyncError> {
        let mut offenders: Vec<i64> = Vec::new();
        for u in &data.updates {
            if !u.is_delayed() {
                continue;
            }
            let hash = u.delayed_op_hash.as_deref().ok_or_else(|| {
                SyncError::integrity(level, "delayed update without operation hash")
            })?;
            let op = self
                .session
                .double_signing_ops
                .values()
                .find(|o| o.op_hash == hash && o.slashed_level.is_none())
                .ok_or_else(|| {
                    SyncError::integrity(level, format!("no pending accusation for {hash}"))
                })?;
            if !offenders.contains(&op.offender_id) {
                offenders.push(op.offender_id);
            }
        }

        let mut deposits = HashMap::new();
        let mut requests = HashMap::new();
        for offender in offenders {
            let offender_addr = self.session.account(offender)?.address.clone();
            let view = self
                .client
                .unstaked_frozen_deposits(level, &offender_addr)
                .await?;
            deposits.insert(offender_addr, view);

            let stakers: Vec<i64> = self
                .session
                .unstake_requests
                .values()
                .filter(|r| r.baker_id == offender && r.staker_id != offender && r.remaining() > 0)
                .map(|r| r.staker_id)
                .collect();
            for staker_id in stakers {
                let addr = self.session.account(staker_id)?.address.clone();
                if requests.contains_key(&addr) {
                    continue;
                }
                let view = self
                    .client
                    .unstake_requests(level, &addr)
                    .await?
                    .ok_or_else(|| {
                        SyncError::integrity(
                            level,
                            format!("unstake-request context for {addr} is pruned on the node"),
                        )
                    })?;
                requests.insert(addr, view);
            }
        }
        data.unstaked_deposits = deposits;
        data.staker_requests = requests;
        Ok(())
    }

    // ─── Apply / revert ───────────────────────────────────────────────────────

    /// Run the full commit sequence for one prepared block.
    pub fn apply(&mut self, data: &BlockData) -> Result<(), SyncError> {
        let level = data.level();
        if level != self.session.app_state.level + 1 {
            return Err(SyncError::integrity(
                level,
                format!("expected level {}, not {level}", self.session.app_state.level + 1),
            ));
        }
        let set = registry::commit_set(data.raw.header.proto, level)?;
        let mut trail = UpdateTrail::new(data.updates.clone());

        set.block.apply(&mut self.session, data, &mut trail)?;
        let events = self.session.block(level)?.events;

        if events.contains(BlockEvents::CYCLE_END) {
            set.rewards.apply(&mut self.session, data, &mut trail)?;
            set.autostaking.apply(&mut self.session, data, &mut trail)?;
            set.slashing.apply(&mut self.session, data, &mut trail)?;
        }
        set.baker_cycles.apply_settlement(&mut self.session, data)?;
        if events.contains(BlockEvents::BALANCE_SNAPSHOT) {
            set.snapshots.apply(&mut self.session, data)?;
        }
        if events.contains(BlockEvents::CYCLE_BEGIN) {
            set.cycles.apply(&mut self.session, data, set.stakes)?;
            set.baker_cycles
                .apply_bootstrap(&mut self.session, data, set.stakes)?;
        }

        trail.ensure_exhausted(level)?;

        // The block row takes ownership of this block's account creations so
        // revert can undo them without replaying anything.
        let created = std::mem::take(&mut self.session.created_accounts);
        self.session.block_mut(level)?.created_accounts = created;

        tracing::info!(
            level,
            cycle = self.session.app_state.cycle,
            events = events.bits(),
            "block applied"
        );
        Ok(())
    }

    /// Undo the newest applied block, commit by commit in reverse order.
    pub fn revert(&mut self) -> Result<(), SyncError> {
        let level = self.session.app_state.level;
        let block = self.session.block(level)?.clone();
        let set = registry::commit_set(block.proto_code, level)?;
        let events = block.events;

        if events.contains(BlockEvents::CYCLE_BEGIN) {
            set.baker_cycles.revert_bootstrap(&mut self.session, level)?;
            set.cycles.revert(&mut self.session, level)?;
        }
        if events.contains(BlockEvents::BALANCE_SNAPSHOT) {
            set.snapshots.revert(&mut self.session, level)?;
        }
        set.baker_cycles.revert_settlement(&mut self.session, level)?;
        if events.contains(BlockEvents::CYCLE_END) {
            set.slashing.revert(&mut self.session, level)?;
            set.autostaking.revert(&mut self.session, level)?;
            set.rewards.revert(&mut self.session, level)?;
        }
        set.block.revert(&mut self.session, level)?;

        for &id in block.created_accounts.iter().rev() {
            self.session.remove_account(id)?;
        }

        tracing::info!(level, "block reverted");
        Ok(())
    }

    // ─── Loop ─────────────────────────────────────────────────────────────────

    /// One poll: apply the next block, revert on a predecessor mismatch, or
    /// report that the head has not moved.
    pub async fn step(&mut self) -> Result<bool, SyncError> {
        let head = self.client.head_level().await?;
        let local = self.session.app_state.level;
        if head <= local {
            return Ok(false);
        }

        let raw = self.client.block(local + 1).await?;
        if local > 0 && raw.header.predecessor != self.session.app_state.block_hash {
            tracing::warn!(
                level = local,
                local_hash = %self.session.app_state.block_hash,
                node_predecessor = %raw.header.predecessor,
                "predecessor mismatch, reverting local head"
            );
            self.revert()?;
            return Ok(true);
        }

        let data = self.prepare(raw).await?;
        self.apply(&data)?;
        if let Some(cursor) = &mut self.cursor {
            cursor.maybe_save(&self.session.app_state).await?;
        }
        Ok(true)
    }

    /// Poll until a fatal error. Transient RPC failures are logged and
    /// retried on the next poll.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                Err(err) if !err.is_fatal() => {
                    tracing::warn!(%err, "transient sync failure, retrying");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    tracing::error!(%err, "sync aborted");
                    if let Some(cursor) = &self.cursor {
                        if let Err(save_err) = cursor.force_save(&self.session.app_state).await {
                            tracing::error!(%save_err, "final cursor save failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}
