//! Bulk balance capture at snapshot levels.
//!
//! One baker row per active baker and one staker row per pseudotoken holder.
//! Rewards settled in the same block are subtracted back out, so the rows
//! reflect the balances rights were actually drawn from. Revert just drops
//! the level's rows.

use stakeindex_core::model::SnapshotBalance;
use stakeindex_core::{SyncError, SyncSession};

use crate::commits::{RewardDestinations, SnapshotCommit};
use crate::data::BlockData;

fn deduct(session: &mut SyncSession, level: i64, baker_id: i64, dest: &RewardDestinations) {
    if let Some(row) = session.snapshots.get_mut(&(level, baker_id)) {
        row.own_delegated_balance -= dest.delegated;
        row.own_staked_balance -= dest.staked_own + dest.staked_edge;
        row.external_staked_balance -= dest.staked_shared;
    }
}

pub struct SnapshotCommitV1;

impl SnapshotCommit for SnapshotCommitV1 {
    fn apply(&self, session: &mut SyncSession, data: &BlockData) -> Result<(), SyncError> {
        let level = data.level();
        let block = session.block(level)?.clone();

        let rows: Vec<SnapshotBalance> = session
            .accounts
            .values()
            .filter_map(|acc| {
                if acc.is_baker && acc.active {
                    Some(SnapshotBalance {
                        level,
                        account_id: acc.id,
                        baker_id: acc.id,
                        own_delegated_balance: acc.own_delegated_balance,
                        external_delegated_balance: acc.external_delegated_balance,
                        own_staked_balance: acc.own_staked_balance,
                        external_staked_balance: acc.external_staked_balance,
                        delegators_count: acc.delegators_count,
                        stakers_count: acc.stakers_count,
                        issued_pseudotokens: acc.issued_pseudotokens,
                        staked_pseudotokens: 0,
                    })
                } else if acc.staked_pseudotokens > 0 {
                    acc.delegate_id.map(|baker_id| SnapshotBalance {
                        level,
                        account_id: acc.id,
                        baker_id,
                        staked_pseudotokens: acc.staked_pseudotokens,
                        ..Default::default()
                    })
                } else {
                    None
                }
            })
            .collect();
        for row in rows {
            session.snapshots.insert((row.level, row.account_id), row);
        }

        // Bakers this very block deactivated still backed the stake the
        // node selected from; the bulk filter skipped them, so their rows
        // are synthesized from the live account fields.
        for &(baker_id, _) in &block.deactivated {
            if session.snapshots.contains_key(&(level, baker_id)) {
                continue;
            }
            let row = {
                let acc = session.account(baker_id)?;
                SnapshotBalance {
                    level,
                    account_id: acc.id,
                    baker_id: acc.id,
                    own_delegated_balance: acc.own_delegated_balance,
                    external_delegated_balance: acc.external_delegated_balance,
                    own_staked_balance: acc.own_staked_balance,
                    external_staked_balance: acc.external_staked_balance,
                    delegators_count: acc.delegators_count,
                    stakers_count: acc.stakers_count,
                    issued_pseudotokens: acc.issued_pseudotokens,
                    staked_pseudotokens: 0,
                }
            };
            session.snapshots.insert((level, baker_id), row);
        }

        // Back out rewards distributed in this very block, so the snapshot
        // matches the pre-distribution balances the node selected from.
        let reward = RewardDestinations {
            delegated: block.reward_delegated,
            staked_own: block.reward_staked_own,
            staked_edge: block.reward_staked_edge,
            staked_shared: block.reward_staked_shared,
        };
        deduct(session, level, block.proposer_id, &reward);
        let bonus = RewardDestinations {
            delegated: block.bonus_delegated,
            staked_own: block.bonus_staked_own,
            staked_edge: block.bonus_staked_edge,
            staked_shared: block.bonus_staked_shared,
        };
        deduct(session, level, block.producer_id, &bonus);

        let settlements: Vec<(i64, RewardDestinations)> = session
            .attestation_reward_ops
            .values()
            .filter(|op| op.level == level)
            .map(|op| {
                (
                    op.baker_id,
                    RewardDestinations {
                        delegated: op.reward_delegated,
                        staked_own: op.reward_staked_own,
                        staked_edge: op.reward_staked_edge,
                        staked_shared: op.reward_staked_shared,
                    },
                )
            })
            .collect();
        for (baker_id, dest) in settlements {
            deduct(session, level, baker_id, &dest);
        }
        Ok(())
    }

    fn revert(&self, session: &mut SyncSession, level: i64) -> Result<(), SyncError> {
        let keys: Vec<(i64, i64)> = session
            .snapshots
            .range((level, i64::MIN)..=(level, i64::MAX))
            .map(|(k, _)| *k)
            .collect();
        if keys.is_empty() {
            return Err(SyncError::revert(level, "no snapshot rows to revert"));
        }
        for key in keys {
            session.snapshots.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::model::{Block, BlockEvents, Protocol};
    use stakeindex_rpc::{RawBlock, RawHeader, RawMetadata};

    const LEVEL: i64 = 4;

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

    fn data(level: i64) -> BlockData {
        let raw = RawBlock {
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

    #[test]
    fn bakers_deactivated_at_the_snapshot_level_still_get_rows() {
        let mut s = SyncSession::new(vec![proto()]).unwrap();
        let active = s.resolve_account("baker1");
        {
            let acc = s.account_mut(active).unwrap();
            acc.is_baker = true;
            acc.active = true;
            acc.own_staked_balance = 8_000;
        }
        let dropped = s.resolve_account("baker2");
        {
            let acc = s.account_mut(dropped).unwrap();
            acc.is_baker = true;
            acc.active = false;
            acc.deactivation_level = LEVEL;
            acc.own_staked_balance = 5_000;
            acc.own_delegated_balance = 1_000;
        }
        s.created_accounts.clear();
        s.blocks.insert(
            LEVEL,
            Block {
                level: LEVEL,
                cycle: 0,
                events: BlockEvents::BALANCE_SNAPSHOT | BlockEvents::DEACTIVATIONS,
                deactivated: vec![(dropped, 0)],
                ..Block::default()
            },
        );

        SnapshotCommitV1.apply(&mut s, &data(LEVEL)).unwrap();

        assert_eq!(s.snapshots[&(LEVEL, active)].own_staked_balance, 8_000);
        let row = &s.snapshots[&(LEVEL, dropped)];
        assert_eq!(row.own_staked_balance, 5_000);
        assert_eq!(row.own_delegated_balance, 1_000);

        SnapshotCommitV1.revert(&mut s, LEVEL).unwrap();
        assert!(s.snapshots.is_empty());
    }
}
