//! Cycle-end settlement of attestation reward expectations.
//!
//! At the last level of a cycle the trail carries one minted attesting
//! reward per eligible baker, either paid out in a destination split or
//! burned as missed. Each settlement must match the expectation accumulated
//! on the (cycle, baker) row exactly; a mismatch means the local model
//! drifted and the sync must stop.

use stakeindex_core::model::AttestationRewardOperation;
use stakeindex_core::{SyncError, SyncSession, UpdateCategory, UpdateTrail};

use crate::commits::{
    consume_reward, credit_destinations, debit_destinations, RewardDestinations, RewardOutcome,
    RewardsCommit,
};
use crate::data::BlockData;

pub struct RewardsCommitV1;

impl RewardsCommit for RewardsCommitV1 {
    fn apply(
        &self,
        session: &mut SyncSession,
        data: &BlockData,
        trail: &mut UpdateTrail,
    ) -> Result<(), SyncError> {
        let level = data.level();
        let cycle = session.block(level)?.cycle;

        let expectants: usize = session
            .baker_cycles
            .range((cycle, i64::MIN)..=(cycle, i64::MAX))
            .filter(|(_, bc)| bc.future_attestation_rewards > 0)
            .count();

        let mut settled = 0usize;
        while let Some((baker, amount, outcome)) = consume_reward(
            trail,
            level,
            UpdateCategory::AttestingRewards,
            Some(UpdateCategory::LostAttestingRewards),
        )? {
            let baker_id = session.account_id(&baker).ok_or_else(|| {
                SyncError::integrity(level, format!("attesting reward for unknown baker {baker}"))
            })?;
            let expected = {
                let bc = session.baker_cycle_mut(cycle, baker_id).ok_or_else(|| {
                    SyncError::integrity(
                        level,
                        format!("attesting reward for baker {baker} without a cycle row"),
                    )
                })?;
                let expected = bc.future_attestation_rewards;
                if expected != amount {
                    return Err(SyncError::integrity(
                        level,
                        format!(
                            "attesting reward {amount} for {baker} does not match expectation {expected}"
                        ),
                    ));
                }
                bc.future_attestation_rewards = 0;
                expected
            };

            let id = session.next_operation_id();
            let mut op = AttestationRewardOperation {
                id,
                level,
                baker_id,
                expected,
                reward_delegated: 0,
                reward_staked_own: 0,
                reward_staked_edge: 0,
                reward_staked_shared: 0,
                lost: 0,
            };
            match outcome {
                RewardOutcome::Paid(dest) => {
                    credit_destinations(session, baker_id, &dest)?;
                    session.statistics.total_created += amount;
                    let bc = session.baker_cycle_mut(cycle, baker_id).ok_or_else(|| {
                        SyncError::integrity(level, "cycle row vanished during settlement")
                    })?;
                    bc.attestation_reward_delegated += dest.delegated;
                    bc.attestation_reward_staked_own += dest.staked_own;
                    bc.attestation_reward_staked_edge += dest.staked_edge;
                    bc.attestation_reward_staked_shared += dest.staked_shared;
                    session.account_mut(baker_id)?.attestation_rewards_count += 1;
                    op.reward_delegated = dest.delegated;
                    op.reward_staked_own = dest.staked_own;
                    op.reward_staked_edge = dest.staked_edge;
                    op.reward_staked_shared = dest.staked_shared;
                }
                RewardOutcome::Burned(lost) => {
                    session.statistics.total_burned += lost;
                    let bc = session.baker_cycle_mut(cycle, baker_id).ok_or_else(|| {
                        SyncError::integrity(level, "cycle row vanished during settlement")
                    })?;
                    bc.missed_attestation_rewards += lost;
                    op.lost = lost;
                }
            }
            session.attestation_reward_ops.insert(id, op);
            session.app_state.attestation_reward_ops_count += 1;
            settled += 1;
        }

        // Every expectation must settle: distributed or burned, never silent.
        if settled != expectants {
            return Err(SyncError::integrity(
                level,
                format!("{expectants} bakers expected attestation rewards, {settled} settled"),
            ));
        }
        Ok(())
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let cycle = session.block(level)?.cycle;

        let ids: Vec<i64> = session
            .attestation_reward_ops
            .values()
            .filter(|o| o.level == level)
            .map(|o| o.id)
            .collect();
        for id in ids.into_iter().rev() {
            let op = session
                .attestation_reward_ops
                .remove(&id)
                .ok_or_else(|| SyncError::revert(level, format!("attestation reward op {id} not found")))?;

            if op.lost > 0 {
                session.statistics.total_burned -= op.lost;
                let bc = session
                    .baker_cycle_mut(cycle, op.baker_id)
                    .ok_or_else(|| SyncError::revert(level, "cycle row missing on revert"))?;
                bc.missed_attestation_rewards -= op.lost;
            } else {
                let dest = RewardDestinations {
                    delegated: op.reward_delegated,
                    staked_own: op.reward_staked_own,
                    staked_edge: op.reward_staked_edge,
                    staked_shared: op.reward_staked_shared,
                };
                debit_destinations(session, op.baker_id, &dest)?;
                session.statistics.total_created -= dest.total();
                let bc = session
                    .baker_cycle_mut(cycle, op.baker_id)
                    .ok_or_else(|| SyncError::revert(level, "cycle row missing on revert"))?;
                bc.attestation_reward_delegated -= dest.delegated;
                bc.attestation_reward_staked_own -= dest.staked_own;
                bc.attestation_reward_staked_edge -= dest.staked_edge;
                bc.attestation_reward_staked_shared -= dest.staked_shared;
                session.account_mut(op.baker_id)?.attestation_rewards_count -= 1;
            }

            let bc = session
                .baker_cycle_mut(cycle, op.baker_id)
                .ok_or_else(|| SyncError::revert(level, "cycle row missing on revert"))?;
            bc.future_attestation_rewards = op.expected;

            session.app_state.attestation_reward_ops_count -= 1;
            session.release_operation_id(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stakeindex_core::model::{BakerCycle, Block, BlockEvents, Protocol};
    use stakeindex_rpc::{RawBlock, RawHeader, RawMetadata};

    const LEVEL: i64 = 8;
    const CYCLE: i64 = 0;

    fn proto() -> Protocol {
        Protocol {
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
        }
    }

    fn data() -> BlockData {
        let raw = RawBlock {
            hash: format!("B{LEVEL}"),
            header: RawHeader {
                level: LEVEL,
                proto: 1,
                predecessor: format!("B{}", LEVEL - 1),
                timestamp: 1_700_000_000 + LEVEL,
                payload_round: 0,
                fitness: vec!["02".into(), "00000000".into()],
            },
            metadata: RawMetadata {
                protocol: "PtTest1".into(),
                next_protocol: "PtTest1".into(),
                proposer: "baker1".into(),
                baker: "baker1".into(),
                balance_updates: vec![],
                deactivated: vec![],
                attestations: vec![],
            },
            operations: vec![],
        };
        BlockData::new(raw, vec![])
    }

    fn fixture(expected: i64) -> (SyncSession, i64) {
        let mut s = SyncSession::new(vec![proto()]).unwrap();
        let baker = s.resolve_account("baker1");
        {
            let acc = s.account_mut(baker).unwrap();
            acc.is_baker = true;
            acc.active = true;
            acc.balance = 10_000;
            acc.own_delegated_balance = 6_000;
            acc.own_staked_balance = 4_000;
        }
        s.created_accounts.clear();
        s.statistics.total_frozen = 4_000;
        s.blocks.insert(
            LEVEL,
            Block {
                level: LEVEL,
                cycle: CYCLE,
                events: BlockEvents::CYCLE_END,
                ..Block::default()
            },
        );
        s.baker_cycles.insert(
            (CYCLE, baker),
            BakerCycle {
                future_attestation_rewards: expected,
                ..BakerCycle::new(CYCLE, baker)
            },
        );
        (s, baker)
    }

    fn trail(raw: Vec<serde_json::Value>) -> UpdateTrail {
        UpdateTrail::parse(&raw, LEVEL).unwrap()
    }

    #[test]
    fn pays_out_the_expected_split_and_reverts_exactly() {
        let (mut s, baker) = fixture(1_000);
        let baseline = s.clone();

        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "attesting rewards", "change": "-1000" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "600" }),
            json!({ "kind": "freezer", "category": "deposits",
                    "staker": { "baker": "baker1" }, "change": "400" }),
        ]);
        RewardsCommitV1.apply(&mut s, &data(), &mut t).unwrap();
        t.ensure_exhausted(LEVEL).unwrap();

        let acc = s.account(baker).unwrap();
        assert_eq!(acc.balance, 11_000);
        assert_eq!(acc.own_delegated_balance, 6_600);
        assert_eq!(acc.own_staked_balance, 4_400);
        assert_eq!(acc.attestation_rewards_count, 1);
        assert_eq!(s.statistics.total_created, 1_000);
        assert_eq!(s.statistics.total_frozen, 4_400);

        let bc = &s.baker_cycles[&(CYCLE, baker)];
        assert_eq!(bc.future_attestation_rewards, 0);
        assert_eq!(bc.attestation_reward_delegated, 600);
        assert_eq!(bc.attestation_reward_staked_own, 400);

        let op = s.attestation_reward_ops.values().next().unwrap();
        assert_eq!(op.expected, 1_000);
        assert_eq!(op.reward_delegated, 600);
        assert_eq!(op.lost, 0);

        RewardsCommitV1.revert(&mut s, LEVEL).unwrap();
        assert_eq!(s, baseline);
    }

    #[test]
    fn burns_a_missed_reward_and_restores_the_expectation() {
        let (mut s, baker) = fixture(700);
        let baseline = s.clone();

        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "attesting rewards", "change": "-700" }),
            json!({ "kind": "burned", "category": "lost attesting rewards",
                    "contract": "baker1", "change": "700" }),
        ]);
        RewardsCommitV1.apply(&mut s, &data(), &mut t).unwrap();
        t.ensure_exhausted(LEVEL).unwrap();

        assert_eq!(s.statistics.total_burned, 700);
        let bc = &s.baker_cycles[&(CYCLE, baker)];
        assert_eq!(bc.future_attestation_rewards, 0);
        assert_eq!(bc.missed_attestation_rewards, 700);
        let op = s.attestation_reward_ops.values().next().unwrap();
        assert_eq!(op.lost, 700);
        assert_eq!(s.account(baker).unwrap().balance, 10_000);

        RewardsCommitV1.revert(&mut s, LEVEL).unwrap();
        assert_eq!(s, baseline);
        assert_eq!(
            s.baker_cycles[&(CYCLE, baker)].future_attestation_rewards,
            700
        );
    }

    #[test]
    fn mismatched_expectation_is_fatal() {
        let (mut s, _) = fixture(1_000);
        let mut t = trail(vec![
            json!({ "kind": "minted", "category": "attesting rewards", "change": "-900" }),
            json!({ "kind": "contract", "contract": "baker1", "change": "900" }),
        ]);
        let err = RewardsCommitV1.apply(&mut s, &data(), &mut t).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unsettled_expectation_is_fatal() {
        let (mut s, _) = fixture(1_000);
        let mut t = trail(vec![]);
        let err = RewardsCommitV1.apply(&mut s, &data(), &mut t).unwrap_err();
        assert!(err.is_fatal());
    }
}
