//! The sync session: entity caches + app state threaded through every commit.
//!
//! There are no process-wide singletons. A session owns the whole mutable
//! model, so apply and revert act on the same in-memory objects symmetrically
//! and isolated sessions can run in parallel tests.

use std::collections::{BTreeMap, HashMap};

use crate::app_state::{AppState, Statistics};
use crate::error::SyncError;
use crate::model::{
    Account, AttestationRewardOperation, AttestingRight, AutostakingOperation, BakerCycle,
    BakingRight, Block, Cycle, DoubleSigningOperation, NonceRevelationOperation, Protocol,
    SnapshotBalance, StakingUpdate, UnstakeRequest, VdfRevelationOperation,
};

/// All mutable state of one sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSession {
    pub app_state: AppState,
    pub statistics: Statistics,
    /// Known protocol versions, ascending by `first_level`. Immutable.
    protocols: Vec<Protocol>,

    pub blocks: BTreeMap<i64, Block>,
    pub accounts: BTreeMap<i64, Account>,
    account_ids: HashMap<String, i64>,
    pub cycles: BTreeMap<i64, Cycle>,
    /// Keyed by `(cycle, baker_id)`.
    pub baker_cycles: BTreeMap<(i64, i64), BakerCycle>,
    /// Keyed by `(level, account_id)`.
    pub snapshots: BTreeMap<(i64, i64), SnapshotBalance>,
    /// Keyed by ledger sequence id.
    pub staking_updates: BTreeMap<i64, StakingUpdate>,
    /// Keyed by `(baker_id, staker_id, cycle)`.
    pub unstake_requests: BTreeMap<(i64, i64, i64), UnstakeRequest>,

    pub autostaking_ops: BTreeMap<i64, AutostakingOperation>,
    pub attestation_reward_ops: BTreeMap<i64, AttestationRewardOperation>,
    pub double_signing_ops: BTreeMap<i64, DoubleSigningOperation>,
    pub nonce_revelation_ops: BTreeMap<i64, NonceRevelationOperation>,
    pub vdf_revelation_ops: BTreeMap<i64, VdfRevelationOperation>,

    /// Rights per cycle, stored when the cycle is bootstrapped.
    pub baking_rights: BTreeMap<i64, Vec<BakingRight>>,
    pub attesting_rights: BTreeMap<i64, Vec<AttestingRight>>,

    /// Accounts created while the current block is applying; drained onto the
    /// block row so revert can remove them again.
    pub created_accounts: Vec<i64>,
}

impl SyncSession {
    pub fn new(mut protocols: Vec<Protocol>) -> Result<Self, SyncError> {
        for p in &protocols {
            p.validate()?;
        }
        protocols.sort_by_key(|p| p.first_level);
        Ok(Self {
            app_state: AppState {
                next_account_id: 1,
                next_operation_id: 1,
                ..Default::default()
            },
            statistics: Statistics::default(),
            protocols,
            blocks: BTreeMap::new(),
            accounts: BTreeMap::new(),
            account_ids: HashMap::new(),
            cycles: BTreeMap::new(),
            baker_cycles: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            staking_updates: BTreeMap::new(),
            unstake_requests: BTreeMap::new(),
            autostaking_ops: BTreeMap::new(),
            attestation_reward_ops: BTreeMap::new(),
            double_signing_ops: BTreeMap::new(),
            nonce_revelation_ops: BTreeMap::new(),
            vdf_revelation_ops: BTreeMap::new(),
            baking_rights: BTreeMap::new(),
            attesting_rights: BTreeMap::new(),
            created_accounts: Vec::new(),
        })
    }

    // ─── Protocols ────────────────────────────────────────────────────────────

    /// The protocol active at `level`.
    pub fn protocol_for_level(&self, level: i64) -> Result<&Protocol, SyncError> {
        self.protocols
            .iter()
            .rev()
            .find(|p| p.first_level <= level)
            .ok_or_else(|| SyncError::integrity(level, "no protocol covers this level"))
    }

    /// Strictly keyed by the code stored on the block being processed.
    pub fn protocol_by_code(&self, code: i32, level: i64) -> Result<&Protocol, SyncError> {
        self.protocols
            .iter()
            .find(|p| p.code == code)
            .ok_or(SyncError::UnknownProtocol { code, level })
    }

    pub fn protocol_by_hash(&self, hash: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.hash == hash)
    }

    // ─── Accounts ─────────────────────────────────────────────────────────────

    pub fn account_id(&self, address: &str) -> Option<i64> {
        self.account_ids.get(address).copied()
    }

    /// Look up an account by address, creating it if first seen. Creations
    /// are tracked in `created_accounts` until the block row takes ownership.
    pub fn resolve_account(&mut self, address: &str) -> i64 {
        if let Some(&id) = self.account_ids.get(address) {
            return id;
        }
        let id = self.app_state.next_account_id;
        self.app_state.next_account_id += 1;
        self.accounts.insert(id, Account::new(id, address));
        self.account_ids.insert(address.to_string(), id);
        self.created_accounts.push(id);
        id
    }

    pub fn account(&self, id: i64) -> Result<&Account, SyncError> {
        self.accounts
            .get(&id)
            .ok_or_else(|| SyncError::integrity(self.app_state.level, format!("unknown account {id}")))
    }

    pub fn account_mut(&mut self, id: i64) -> Result<&mut Account, SyncError> {
        let level = self.app_state.level;
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| SyncError::integrity(level, format!("unknown account {id}")))
    }

    /// Undo an account creation (the account must be the most recent one).
    pub fn remove_account(&mut self, id: i64) -> Result<(), SyncError> {
        if id != self.app_state.next_account_id - 1 {
            return Err(SyncError::revert(
                self.app_state.level,
                format!("account {id} is not the most recently created"),
            ));
        }
        let account = self
            .accounts
            .remove(&id)
            .ok_or_else(|| SyncError::revert(self.app_state.level, format!("unknown account {id}")))?;
        self.account_ids.remove(&account.address);
        self.app_state.next_account_id -= 1;
        Ok(())
    }

    /// Ids of all accounts holding pseudotokens of `baker_id`, ascending.
    /// The ascending order makes the pro-rata rounding target (the last
    /// staker) deterministic.
    pub fn stakers_of(&self, baker_id: i64) -> Vec<i64> {
        self.accounts
            .values()
            .filter(|a| a.delegate_id == Some(baker_id) && a.staked_pseudotokens > 0)
            .map(|a| a.id)
            .collect()
    }

    // ─── Rows ─────────────────────────────────────────────────────────────────

    pub fn block(&self, level: i64) -> Result<&Block, SyncError> {
        self.blocks
            .get(&level)
            .ok_or_else(|| SyncError::revert(level, "block row not found"))
    }

    pub fn block_mut(&mut self, level: i64) -> Result<&mut Block, SyncError> {
        self.blocks
            .get_mut(&level)
            .ok_or_else(|| SyncError::revert(level, "block row not found"))
    }

    pub fn cycle(&self, index: i64) -> Result<&Cycle, SyncError> {
        self.cycles
            .get(&index)
            .ok_or_else(|| SyncError::integrity(self.app_state.level, format!("unknown cycle {index}")))
    }

    pub fn baker_cycle_mut(&mut self, cycle: i64, baker_id: i64) -> Option<&mut BakerCycle> {
        self.baker_cycles.get_mut(&(cycle, baker_id))
    }

    pub fn unstake_request_mut(
        &mut self,
        baker_id: i64,
        staker_id: i64,
        cycle: i64,
    ) -> &mut UnstakeRequest {
        self.unstake_requests
            .entry((baker_id, staker_id, cycle))
            .or_insert_with(|| UnstakeRequest::new(baker_id, staker_id, cycle))
    }

    // ─── Ids ──────────────────────────────────────────────────────────────────

    pub fn next_operation_id(&mut self) -> i64 {
        let id = self.app_state.next_operation_id;
        self.app_state.next_operation_id += 1;
        id
    }

    /// Undo the most recent operation-id allocation.
    pub fn release_operation_id(&mut self, id: i64) -> Result<(), SyncError> {
        if id != self.app_state.next_operation_id - 1 {
            return Err(SyncError::revert(
                self.app_state.level,
                format!("operation {id} is not the most recently allocated"),
            ));
        }
        self.app_state.next_operation_id -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocols() -> Vec<Protocol> {
        vec![Protocol {
            code: 1,
            hash: "PtTest1".into(),
            first_level: 1,
            first_cycle: 0,
            blocks_per_cycle: 8,
            blocks_per_snapshot: 4,
            attesters_per_block: 16,
            consensus_threshold: 11,
            consensus_rights_delay: 2,
            minimal_stake: 6_000,
            minimal_frozen_stake: 600,
            max_delegated_over_frozen: 9,
            max_external_over_own: 5,
            grace_cycles: 3,
            unstake_cooldown_cycles: 4,
        }]
    }

    #[test]
    fn resolve_account_allocates_sequential_ids() {
        let mut s = SyncSession::new(protocols()).unwrap();
        let a = s.resolve_account("baker1");
        let b = s.resolve_account("staker1");
        assert_eq!((a, b), (1, 2));
        assert_eq!(s.resolve_account("baker1"), 1); // idempotent
        assert_eq!(s.created_accounts, vec![1, 2]);
        assert_eq!(s.app_state.next_account_id, 3);
    }

    #[test]
    fn remove_account_is_lifo() {
        let mut s = SyncSession::new(protocols()).unwrap();
        let a = s.resolve_account("baker1");
        let b = s.resolve_account("staker1");
        assert!(s.remove_account(a).is_err()); // not the most recent
        s.remove_account(b).unwrap();
        s.remove_account(a).unwrap();
        assert_eq!(s.app_state.next_account_id, 1);
        assert!(s.account_id("baker1").is_none());
    }

    #[test]
    fn unknown_protocol_code_is_fatal() {
        let s = SyncSession::new(protocols()).unwrap();
        assert!(matches!(
            s.protocol_by_code(9, 42),
            Err(SyncError::UnknownProtocol { code: 9, level: 42 })
        ));
        assert!(s.protocol_by_code(1, 42).is_ok());
    }

    #[test]
    fn stakers_are_sorted_by_id() {
        let mut s = SyncSession::new(protocols()).unwrap();
        let baker = s.resolve_account("baker1");
        for addr in ["s3", "s1", "s2"] {
            let id = s.resolve_account(addr);
            let acc = s.account_mut(id).unwrap();
            acc.delegate_id = Some(baker);
            acc.staked_pseudotokens = 10;
        }
        let stakers = s.stakers_of(baker);
        assert_eq!(stakers, vec![2, 3, 4]);
    }
}
