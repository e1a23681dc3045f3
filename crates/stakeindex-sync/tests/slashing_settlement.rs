//! End-to-end slashing settlement scenarios: pro-rata distribution over
//! pseudotoken holders, the unstake-request cross-check against the node's
//! view, conservation of slashed value, and exact revert.

use stakeindex_core::model::{
    Block, BlockEvents, DoubleSigningKind, DoubleSigningOperation, Protocol, StakingUpdateKind,
    UnstakeRequest,
};
use stakeindex_core::{
    BalanceUpdate, Staker, SyncSession, UpdateCategory, UpdateKind, UpdateOrigin, UpdateTrail,
};
use stakeindex_rpc::{RawBlock, RawHeader, RawMetadata, RawUnstakeRequest, RawUnstakedDeposit};
use stakeindex_sync::commits::slashing::{SlashingCommitV1, SlashingCommitV3};
use stakeindex_sync::commits::SlashingCommit;
use stakeindex_sync::BlockData;

const LEVEL: i64 = 8;
const CYCLE: i64 = 0;

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

fn raw_block(level: i64) -> RawBlock {
    RawBlock {
        hash: format!("B{level}"),
        header: RawHeader {
            level,
            proto: 1,
            predecessor: format!("B{}", level - 1),
            timestamp: 1_700_000_000 + level,
            payload_round: 0,
            fitness: vec!["02".into(), "00000000".into()],
        },
        metadata: RawMetadata {
            protocol: "PtTest1".into(),
            next_protocol: "PtTest1".into(),
            proposer: "offender".into(),
            baker: "offender".into(),
            balance_updates: vec![],
            deactivated: vec![],
            attestations: vec![],
        },
        operations: vec![],
    }
}

/// A session with the offender and accuser registered and the settling
/// block's row already stored, as the block commit would have left it.
fn base_session() -> (SyncSession, i64, i64) {
    let mut s = SyncSession::new(protocols()).unwrap();
    let offender = s.resolve_account("offender");
    let accuser = s.resolve_account("accuser");
    {
        let acc = s.account_mut(offender).unwrap();
        acc.is_baker = true;
        acc.active = true;
    }
    {
        let acc = s.account_mut(accuser).unwrap();
        acc.is_baker = true;
        acc.active = true;
        acc.balance = 50_000;
        acc.own_delegated_balance = 50_000;
    }
    s.blocks.insert(
        LEVEL,
        Block {
            level: LEVEL,
            hash: format!("B{LEVEL}"),
            predecessor: format!("B{}", LEVEL - 1),
            cycle: CYCLE,
            proto_code: 1,
            events: BlockEvents::CYCLE_END | BlockEvents::SLASHING,
            ..Block::default()
        },
    );
    s.created_accounts.clear();
    s.app_state.level = LEVEL;
    (s, offender, accuser)
}

fn pending_accusation(s: &mut SyncSession, hash: &str, offender: i64, accuser: i64) -> i64 {
    let id = s.next_operation_id();
    s.double_signing_ops.insert(
        id,
        DoubleSigningOperation {
            id,
            level: 5,
            kind: DoubleSigningKind::Baking,
            op_hash: hash.into(),
            accused_level: 3,
            accuser_id: accuser,
            offender_id: offender,
            slashed_level: None,
            reward: 0,
            lost_staked: 0,
            lost_unstaked: 0,
            lost_external_staked: 0,
            lost_external_unstaked: 0,
            staking_updates_count: 0,
        },
    );
    id
}

fn delayed(
    kind: UpdateKind,
    category: Option<UpdateCategory>,
    staker: Option<Staker>,
    contract: Option<&str>,
    cycle: Option<i64>,
    change: i64,
    hash: &str,
) -> BalanceUpdate {
    BalanceUpdate {
        kind,
        category,
        contract: contract.map(str::to_string),
        staker,
        cycle,
        change,
        origin: UpdateOrigin::DelayedOperation,
        delayed_op_hash: Some(hash.into()),
    }
}

fn slash_own_deposit(change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Freezer,
        Some(UpdateCategory::Deposits),
        Some(Staker::BakerOwn { baker: "offender".into() }),
        None,
        None,
        change,
        hash,
    )
}

fn slash_shared_deposit(change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Freezer,
        Some(UpdateCategory::Deposits),
        Some(Staker::Shared { delegate: "offender".into() }),
        None,
        None,
        change,
        hash,
    )
}

fn slash_shared_unstaked(cycle: i64, change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Freezer,
        Some(UpdateCategory::UnstakedDeposits),
        Some(Staker::Shared { delegate: "offender".into() }),
        None,
        Some(cycle),
        change,
        hash,
    )
}

fn slash_own_unstaked(cycle: i64, change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Freezer,
        Some(UpdateCategory::UnstakedDeposits),
        Some(Staker::BakerOwn { baker: "offender".into() }),
        None,
        Some(cycle),
        change,
        hash,
    )
}

fn punishment_burn(change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Burned,
        Some(UpdateCategory::Punishments),
        None,
        None,
        None,
        change,
        hash,
    )
}

fn accuser_reward(change: i64, hash: &str) -> BalanceUpdate {
    delayed(
        UpdateKind::Contract,
        None,
        None,
        Some("accuser"),
        None,
        change,
        hash,
    )
}

fn apply(
    commit: &dyn SlashingCommit,
    session: &mut SyncSession,
    mut data: BlockData,
) -> Result<(), stakeindex_core::SyncError> {
    let updates = std::mem::take(&mut data.updates);
    let mut trail = UpdateTrail::new(updates.clone());
    data.updates = updates;
    commit.apply(session, &data, &mut trail)?;
    trail.ensure_exhausted(LEVEL)?;
    Ok(())
}

/// Three stakers holding 500k/300k/200k pseudotokens of a 1M pool. Seeded
/// directly so the ledger starts empty and only the slashing entries appear.
fn seed_staked_pool(s: &mut SyncSession, offender: i64) -> Vec<i64> {
    {
        let acc = s.account_mut(offender).unwrap();
        acc.balance = 500_000;
        acc.own_delegated_balance = 300_000;
        acc.own_staked_balance = 200_000;
        acc.external_staked_balance = 1_000_000;
        acc.issued_pseudotokens = 1_000_000;
    }
    let mut stakers = Vec::new();
    for (addr, pt) in [("s1", 500_000), ("s2", 300_000), ("s3", 200_000)] {
        let id = s.resolve_account(addr);
        let acc = s.account_mut(id).unwrap();
        acc.delegate_id = Some(offender);
        acc.staked_pseudotokens = pt;
        stakers.push(id);
    }
    s.created_accounts.clear();
    s.statistics.total_frozen = 1_200_000;
    stakers
}

#[test]
fn external_stake_is_slashed_pro_rata_and_reverts_exactly() {
    let (mut s, offender, accuser) = base_session();
    let stakers = seed_staked_pool(&mut s, offender);
    let op = pending_accusation(&mut s, "opD1", offender, accuser);
    let baseline = s.clone();

    let updates = vec![
        slash_own_deposit(-200_000, "opD1"),
        slash_shared_deposit(-330_000, "opD1"),
        punishment_burn(397_500, "opD1"),
        accuser_reward(132_500, "opD1"),
    ];
    let data = BlockData::new(raw_block(LEVEL), updates);
    apply(&SlashingCommitV1, &mut s, data).unwrap();

    let acc = s.account(offender).unwrap();
    assert_eq!(acc.own_staked_balance, 0);
    assert_eq!(acc.balance, 300_000);
    assert_eq!(acc.external_staked_balance, 670_000);
    // Stakers keep their pseudotokens; the pool lost value under them.
    assert_eq!(s.account(stakers[0]).unwrap().staked_pseudotokens, 500_000);

    // One own entry plus one per staker, ascending staker id, no rounding.
    let entries: Vec<_> = s.staking_updates.values().collect();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|u| u.kind == StakingUpdateKind::SlashStaked));
    assert_eq!(entries[0].amount, 200_000);
    let external: Vec<(i64, i64, i64)> = entries[1..]
        .iter()
        .map(|u| (u.staker_id, u.amount, u.rounding_error))
        .collect();
    assert_eq!(
        external,
        vec![
            (stakers[0], 165_000, 0),
            (stakers[1], 99_000, 0),
            (stakers[2], 66_000, 0),
        ]
    );

    assert_eq!(s.statistics.total_frozen, 670_000);
    assert_eq!(s.statistics.total_burned, 397_500);
    let accuser_acc = s.account(accuser).unwrap();
    assert_eq!(accuser_acc.balance, 182_500);

    let row = &s.double_signing_ops[&op];
    assert_eq!(row.slashed_level, Some(LEVEL));
    assert_eq!(row.lost_staked, 200_000);
    assert_eq!(row.lost_external_staked, 330_000);
    assert_eq!(row.reward, 132_500);
    assert_eq!(row.total_lost(), row.burned() + row.reward);
    assert_eq!(row.staking_updates_count, 4);

    SlashingCommitV1.revert(&mut s, LEVEL).unwrap();
    assert_eq!(s, baseline);
}

#[test]
fn reported_discrepancy_lands_on_the_last_stakers_entry() {
    let (mut s, offender, accuser) = base_session();
    let stakers = seed_staked_pool(&mut s, offender);
    pending_accusation(&mut s, "opD1", offender, accuser);

    // Reported external loss is 330_001; the locally computed shares sum to
    // 330_003, so the last staker's entry carries the +2 correction.
    let updates = vec![
        slash_own_deposit(-200_000, "opD1"),
        slash_shared_deposit(-330_001, "opD1"),
        punishment_burn(397_501, "opD1"),
        accuser_reward(132_500, "opD1"),
    ];
    let data = BlockData::new(raw_block(LEVEL), updates);
    apply(&SlashingCommitV1, &mut s, data).unwrap();

    let external: Vec<_> = s
        .staking_updates
        .values()
        .filter(|u| u.staker_id != offender)
        .collect();
    assert_eq!(
        external
            .iter()
            .map(|u| (u.staker_id, u.amount, u.rounding_error))
            .collect::<Vec<_>>(),
        vec![
            (stakers[0], 165_001, 0),
            (stakers[1], 99_001, 0),
            (stakers[2], 66_001, 2),
        ]
    );
    // The effective pool movement reconciles with the reported figure.
    let effective: i64 = external.iter().map(|u| u.effective_amount()).sum();
    assert_eq!(effective, 330_001);
    assert_eq!(s.account(offender).unwrap().external_staked_balance, 669_999);
}

#[test]
fn external_unstaked_slash_follows_the_node_view_diffs() {
    let (mut s, offender, accuser) = base_session();
    {
        let acc = s.account_mut(offender).unwrap();
        acc.balance = 10_000;
        acc.own_delegated_balance = 5_000;
        acc.external_delegated_balance = 10_000;
        acc.unstaked_balance = 5_000;
    }
    let s1 = s.resolve_account("s1");
    {
        let acc = s.account_mut(s1).unwrap();
        acc.delegate_id = Some(offender);
        acc.unstaked_balance = 10_000;
    }
    s.created_accounts.clear();
    s.unstake_requests.insert(
        (offender, offender, CYCLE),
        UnstakeRequest {
            requested_amount: 5_000,
            updates_count: 1,
            ..UnstakeRequest::new(offender, offender, CYCLE)
        },
    );
    s.unstake_requests.insert(
        (offender, s1, CYCLE),
        UnstakeRequest {
            requested_amount: 10_000,
            updates_count: 1,
            ..UnstakeRequest::new(offender, s1, CYCLE)
        },
    );
    let op = pending_accusation(&mut s, "opD2", offender, accuser);
    let baseline = s.clone();

    let updates = vec![
        slash_own_unstaked(CYCLE, -2_000, "opD2"),
        slash_shared_unstaked(CYCLE, -4_000, "opD2"),
        punishment_burn(5_000, "opD2"),
        accuser_reward(1_000, "opD2"),
    ];
    let mut data = BlockData::new(raw_block(LEVEL), updates);
    // Node view after the block: 15_000 pending locally, 2_000 own and
    // 4_000 of s1's request gone.
    data.unstaked_deposits.insert(
        "offender".into(),
        vec![RawUnstakedDeposit { cycle: CYCLE, deposit: 9_000 }],
    );
    data.staker_requests.insert(
        "s1".into(),
        vec![RawUnstakeRequest { cycle: CYCLE, amount: 6_000 }],
    );
    apply(&SlashingCommitV1, &mut s, data).unwrap();

    let own_req = &s.unstake_requests[&(offender, offender, CYCLE)];
    assert_eq!(own_req.slashed_amount, 2_000);
    assert_eq!(own_req.remaining(), 3_000);
    let staker_req = &s.unstake_requests[&(offender, s1, CYCLE)];
    assert_eq!(staker_req.slashed_amount, 4_000);
    assert_eq!(staker_req.remaining(), 6_000);

    let acc = s.account(offender).unwrap();
    assert_eq!(acc.unstaked_balance, 3_000);
    assert_eq!(acc.balance, 8_000);
    assert_eq!(acc.external_delegated_balance, 6_000);
    assert_eq!(s.account(s1).unwrap().unstaked_balance, 6_000);

    let row = &s.double_signing_ops[&op];
    assert_eq!(row.lost_unstaked, 2_000);
    assert_eq!(row.lost_external_unstaked, 4_000);
    assert_eq!(row.staking_updates_count, 2);

    SlashingCommitV1.revert(&mut s, LEVEL).unwrap();
    assert_eq!(s, baseline);
}

#[test]
fn revert_follows_the_ledger_when_trail_order_differs_from_op_ids() {
    let (mut s, offender, accuser) = base_session();
    {
        let acc = s.account_mut(offender).unwrap();
        acc.balance = 10_000;
        acc.own_staked_balance = 10_000;
    }
    s.statistics.total_frozen = 10_000;
    let op_a = pending_accusation(&mut s, "opA", offender, accuser);
    let op_b = pending_accusation(&mut s, "opB", offender, accuser);
    assert!(op_a < op_b);
    let baseline = s.clone();

    // The trail settles opB before opA, so opA's ledger entry ends up on
    // top despite its lower op id.
    let updates = vec![
        slash_own_deposit(-2_000, "opB"),
        punishment_burn(1_500, "opB"),
        accuser_reward(500, "opB"),
        slash_own_deposit(-1_000, "opA"),
        punishment_burn(1_000, "opA"),
    ];
    let data = BlockData::new(raw_block(LEVEL), updates);
    apply(&SlashingCommitV1, &mut s, data).unwrap();

    let entries: Vec<_> = s.staking_updates.values().collect();
    assert_eq!(entries[0].amount, 2_000);
    assert_eq!(entries[1].amount, 1_000);
    assert_eq!(s.account(offender).unwrap().own_staked_balance, 7_000);
    assert_eq!(s.account(accuser).unwrap().balance, 50_500);

    SlashingCommitV1.revert(&mut s, LEVEL).unwrap();
    assert_eq!(s, baseline);
}

#[test]
fn v1_rejects_two_accusations_against_one_unstaked_pool() {
    let (mut s, offender, accuser) = base_session();
    let s1 = s.resolve_account("s1");
    {
        let acc = s.account_mut(s1).unwrap();
        acc.delegate_id = Some(offender);
        acc.unstaked_balance = 10_000;
    }
    s.created_accounts.clear();
    s.unstake_requests.insert(
        (offender, s1, CYCLE),
        UnstakeRequest {
            requested_amount: 10_000,
            updates_count: 1,
            ..UnstakeRequest::new(offender, s1, CYCLE)
        },
    );
    pending_accusation(&mut s, "opA", offender, accuser);
    pending_accusation(&mut s, "opB", offender, accuser);

    let updates = vec![
        slash_shared_unstaked(CYCLE, -3_000, "opA"),
        punishment_burn(3_000, "opA"),
        slash_shared_unstaked(CYCLE, -1_000, "opB"),
        punishment_burn(500, "opB"),
        accuser_reward(500, "opB"),
    ];
    let mut data = BlockData::new(raw_block(LEVEL), updates);
    data.unstaked_deposits.insert(
        "offender".into(),
        vec![RawUnstakedDeposit { cycle: CYCLE, deposit: 6_000 }],
    );
    data.staker_requests.insert(
        "s1".into(),
        vec![RawUnstakeRequest { cycle: CYCLE, amount: 6_000 }],
    );

    let err = apply(&SlashingCommitV1, &mut s, data).unwrap_err();
    assert!(err.is_fatal());
    // Nothing was applied.
    assert_eq!(s.app_state.staking_updates_count, 0);
}

#[test]
fn v3_apportions_a_shared_pool_by_burned_share() {
    let (mut s, offender, accuser) = base_session();
    let s1 = s.resolve_account("s1");
    {
        let acc = s.account_mut(offender).unwrap();
        acc.external_delegated_balance = 10_000;
    }
    {
        let acc = s.account_mut(s1).unwrap();
        acc.delegate_id = Some(offender);
        acc.unstaked_balance = 10_000;
    }
    s.created_accounts.clear();
    s.unstake_requests.insert(
        (offender, s1, CYCLE),
        UnstakeRequest {
            requested_amount: 10_000,
            updates_count: 1,
            ..UnstakeRequest::new(offender, s1, CYCLE)
        },
    );
    let op_a = pending_accusation(&mut s, "opA", offender, accuser);
    let op_b = pending_accusation(&mut s, "opB", offender, accuser);
    let baseline = s.clone();

    let updates = vec![
        slash_shared_unstaked(CYCLE, -3_000, "opA"),
        punishment_burn(3_000, "opA"),
        slash_shared_unstaked(CYCLE, -1_000, "opB"),
        punishment_burn(500, "opB"),
        accuser_reward(500, "opB"),
    ];
    let mut data = BlockData::new(raw_block(LEVEL), updates);
    data.unstaked_deposits.insert(
        "offender".into(),
        vec![RawUnstakedDeposit { cycle: CYCLE, deposit: 6_000 }],
    );
    data.staker_requests.insert(
        "s1".into(),
        vec![RawUnstakeRequest { cycle: CYCLE, amount: 6_000 }],
    );
    apply(&SlashingCommitV3, &mut s, data).unwrap();

    // s1's 4_000 loss split by burned share 3_000:500, remainder on the
    // last accusation: 4_000 * 3_000 / 3_500 = 3_428, then 572.
    let entries: Vec<_> = s.staking_updates.values().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].amount, 3_428);
    assert_eq!(entries[1].amount, 572);
    assert!(entries.iter().all(|u| u.kind == StakingUpdateKind::SlashUnstaked));

    let req = &s.unstake_requests[&(offender, s1, CYCLE)];
    assert_eq!(req.slashed_amount, 4_000);
    assert_eq!(req.remaining(), 6_000);

    // Operation rows keep the reported per-accusation totals.
    assert_eq!(s.double_signing_ops[&op_a].lost_external_unstaked, 3_000);
    assert_eq!(s.double_signing_ops[&op_b].lost_external_unstaked, 1_000);
    assert_eq!(s.double_signing_ops[&op_b].reward, 500);
    assert_eq!(s.account(accuser).unwrap().balance, 50_500);

    SlashingCommitV3.revert(&mut s, LEVEL).unwrap();
    assert_eq!(s, baseline);
}
