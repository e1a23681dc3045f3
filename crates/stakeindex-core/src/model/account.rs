//! Accounts: bakers (delegates) and the stakers/delegators attached to them.

use serde::{Deserialize, Serialize};

/// Mutable running balances and counters of one account.
///
/// Bakers and plain accounts share the row; baker-only fields stay zero for
/// everyone else. The staking-balance identity is maintained structurally:
/// [`Account::staking_balance`] is derived from the four components rather
/// than stored, so it cannot drift.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub address: String,
    /// Set once an address appears in a baker role; never unset.
    pub is_baker: bool,
    pub active: bool,
    /// Level at which the baker will be (or was) deactivated. Zero until the
    /// account first bakes.
    pub deactivation_level: i64,
    /// Baker this account delegates/stakes to, for non-baker accounts.
    pub delegate_id: Option<i64>,

    /// Full own balance: spendable + own staked + own unstaked funds.
    pub balance: i64,
    /// Own non-frozen funds counted toward the baker's stake (includes
    /// pending own unstake requests, which stay delegated until finalized).
    pub own_delegated_balance: i64,
    /// Funds delegated (not staked) by other accounts.
    pub external_delegated_balance: i64,
    /// The baker's own frozen stake.
    pub own_staked_balance: i64,
    /// The pooled frozen stake of external stakers.
    pub external_staked_balance: i64,
    /// Pseudotokens issued against `external_staked_balance`.
    pub issued_pseudotokens: i64,
    /// Pseudotokens held by this account in its baker's pool.
    pub staked_pseudotokens: i64,
    /// This account's pending unstaked funds (own view).
    pub unstaked_balance: i64,

    pub delegators_count: i32,
    pub stakers_count: i32,
    pub blocks_count: i32,
    pub attestation_rewards_count: i32,
    pub autostaking_ops_count: i32,
    pub double_baking_count: i32,
    pub double_attesting_count: i32,
    pub double_preattesting_count: i32,
    pub nonce_revelations_count: i32,
    pub vdf_revelations_count: i32,
}

impl Account {
    pub fn new(id: i64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            ..Default::default()
        }
    }

    /// Total stake backing this baker's rights:
    /// own delegated + external delegated + own staked + external staked.
    pub fn staking_balance(&self) -> i64 {
        self.own_delegated_balance
            + self.external_delegated_balance
            + self.own_staked_balance
            + self.external_staked_balance
    }

    /// Total frozen (slashable) stake.
    pub fn total_staked_balance(&self) -> i64 {
        self.own_staked_balance + self.external_staked_balance
    }

    /// Total delegated (non-frozen) stake.
    pub fn total_delegated_balance(&self) -> i64 {
        self.own_delegated_balance + self.external_delegated_balance
    }
}
