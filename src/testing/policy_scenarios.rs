//! Rebalance policy scenario suite.
//!
//! End-to-end tests driving the policy through join/leave/merge event
//! sequences with deterministic collaborators, verifying:
//! - Topology versioning across installs, shrinks, and promotions
//! - Broadcast suppression and ordering rules
//! - Stale-confirmation rejection
//!
//! # Test Strategy
//!
//! Each test builds a `PolicyHarness` wiring the policy to a
//! [`StaticTransport`], a [`RecordingTopologyManager`], and a
//! [`ManualExecutor`], so every asynchronous rebalance pass runs exactly
//! when the test drains it.
//!
//! | Test                                  | Scenario                                |
//! |---------------------------------------|-----------------------------------------|
//! | `single_node_bootstrap`               | first joiner, unbroadcast initial CH    |
//! | `second_joiner_triggers_rebalance`    | join → pending → confirmed promote      |
//! | `leaver_mid_rebalance`                | shrink keeps id, replay is stale        |
//! | `leavers_emptying_cache_stay_quiet`   | no members → no broadcast, no trigger   |
//! | `partition_heal_installs_union`       | merge at max id, rebalance restores     |
//! | `duplicate_completion_is_stale`       | second confirmation rejected            |
//! | `rejoining_owner_is_not_a_joiner`     | duplicate join is a no-op               |
//! | `joiner_ahead_of_cluster_view`        | join races the view carrying it         |
//! | `lost_submission_recovers_on_next_view` | dropped job, view change retries      |
//! | `convergence_after_view_shrink`       | repeated passes reach balance           |

#[cfg(test)]
mod tests {
    use crate::hash::{ConsistentHashFactory, RendezvousHashFactory};
    use crate::testing::{ManualExecutor, RecordingTopologyManager, StaticTransport};
    use crate::topology::{CacheJoinInfo, CacheTopology, RebalancePolicy};
    use crate::types::{Address, HashFunction};
    use crate::Error;
    use std::sync::Arc;

    const CACHE: &str = "users";

    struct PolicyHarness {
        policy: RebalancePolicy,
        manager: Arc<RecordingTopologyManager>,
        executor: Arc<ManualExecutor>,
    }

    impl PolicyHarness {
        fn new(members: &[Address]) -> Self {
            let manager = Arc::new(RecordingTopologyManager::new());
            let executor = Arc::new(ManualExecutor::new());
            let policy = RebalancePolicy::new(
                Arc::new(StaticTransport::new(members.to_vec())),
                manager.clone(),
                executor.clone(),
            );
            policy.start();
            Self {
                policy,
                manager,
                executor,
            }
        }

        fn init_cache(&self, num_owners: usize, num_segments: usize) {
            let join_info = CacheJoinInfo::new(
                HashFunction::default(),
                num_owners,
                num_segments,
                Arc::new(RendezvousHashFactory),
            )
            .unwrap();
            self.policy.init_cache(CACHE, join_info);
        }

        /// Drain rebalance passes and confirm every initiated rebalance
        /// until the cache goes steady.
        fn settle(&self) {
            let mut confirmed = 0;
            for _ in 0..16 {
                self.executor.run_pending();
                let rebalances = self.manager.rebalances();
                if rebalances.len() == confirmed {
                    return;
                }
                for (cache, topology) in &rebalances[confirmed..] {
                    self.policy
                        .on_rebalance_completed(cache, topology.topology_id())
                        .unwrap();
                }
                confirmed = rebalances.len();
            }
            panic!("cache did not settle within 16 rounds");
        }

        fn topology(&self) -> Arc<CacheTopology> {
            self.policy.get_topology(CACHE).unwrap()
        }

        fn assert_joiners_disjoint_from_owners(&self) {
            let status = self.policy.status(CACHE).unwrap();
            if let Some(current) = status.topology().current_ch() {
                for joiner in status.joiners() {
                    assert!(
                        !current.contains(joiner),
                        "joiner {} already owns segments",
                        joiner
                    );
                }
            }
        }
    }

    #[test]
    fn single_node_bootstrap() {
        let harness = PolicyHarness::new(&[1]);
        harness.init_cache(2, 4);

        let topology = harness.policy.add_joiners(CACHE, &[1]).unwrap().unwrap();
        assert_eq!(topology.topology_id(), 0);
        assert!(topology.pending_ch().is_none());

        let current = topology.current_ch().unwrap();
        assert_eq!(current.members(), &[1]);
        for segment in 0..4 {
            assert_eq!(current.owners(segment), &[1]);
        }

        // The initial topology travels back as the join response only.
        assert!(harness.manager.updates().is_empty());
        assert_eq!(harness.executor.pending(), 0);
        assert_eq!(*harness.topology(), *topology);
        harness.assert_joiners_disjoint_from_owners();
    }

    #[test]
    fn second_joiner_triggers_rebalance() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();

        let topology = harness.policy.add_joiners(CACHE, &[2]).unwrap().unwrap();
        // The join response carries the topology as of the join; the
        // rebalance toward the new member runs asynchronously.
        assert_eq!(topology.topology_id(), 0);
        assert_eq!(harness.executor.run_pending(), 1);

        let rebalances = harness.manager.rebalances();
        assert_eq!(rebalances.len(), 1);
        let pending = rebalances[0].1.pending_ch().unwrap().clone();
        assert_eq!(rebalances[0].1.topology_id(), 1);
        assert_eq!(pending.members(), &[1, 2]);
        assert!(pending.is_balanced());
        for segment in 0..4 {
            assert_eq!(pending.owners(segment).len(), 2);
        }

        harness.policy.on_rebalance_completed(CACHE, 1).unwrap();
        let settled = harness.topology();
        assert_eq!(settled.topology_id(), 2);
        assert!(settled.pending_ch().is_none());
        let current = settled.current_ch().unwrap();
        assert_eq!(current, &pending);
        assert!(current.is_balanced());

        // Promotion is broadcast; the cache is steady.
        assert_eq!(harness.manager.updates().len(), 1);
        assert_eq!(harness.executor.pending(), 0);
        harness.assert_joiners_disjoint_from_owners();
    }

    #[test]
    fn leaver_mid_rebalance() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.executor.run_pending();
        assert!(harness.topology().rebalance_in_progress());

        harness.policy.remove_leavers(CACHE, &[2]).unwrap();

        // A membership shrink replaces the hashes but mints no id.
        let shrunk = harness.topology();
        assert_eq!(shrunk.topology_id(), 1);
        assert_eq!(shrunk.current_ch().unwrap().members(), &[1]);
        assert_eq!(shrunk.pending_ch().unwrap().members(), &[1]);
        assert_eq!(harness.manager.last_update().unwrap().topology_id(), 1);

        // The shrink re-triggers, but the outstanding rebalance wins.
        let triggered = harness.policy.metrics().rebalances_triggered.get();
        assert!(triggered >= 1);
        harness.executor.run_pending();
        assert_eq!(harness.policy.metrics().rebalances_coalesced.get(), 1);
        assert_eq!(harness.manager.rebalances().len(), 1);

        // The shrunk pending hash still promotes cleanly...
        harness.policy.on_rebalance_completed(CACHE, 1).unwrap();
        let promoted = harness.topology();
        assert_eq!(promoted.topology_id(), 2);
        assert_eq!(promoted.current_ch().unwrap().members(), &[1]);
        assert!(promoted.current_ch().unwrap().is_balanced());

        // ...and a replay of the old confirmation is stale.
        let err = harness.policy.on_rebalance_completed(CACHE, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleRebalanceConfirmation {
                received: 1,
                expected: 2,
                ..
            }
        ));
        assert!(harness.policy.metrics().stale_confirmations.get() >= 1);
    }

    #[test]
    fn leavers_emptying_cache_stay_quiet() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.executor.run_pending();

        let broadcasts_before = harness.manager.updates().len();
        harness.policy.remove_leavers(CACHE, &[1, 2]).unwrap();

        let emptied = harness.topology();
        assert_eq!(emptied.topology_id(), 1);
        assert!(emptied.current_ch().is_none());
        assert!(emptied.pending_ch().is_none());

        // Nobody left to broadcast to, nothing to rebalance.
        assert_eq!(harness.manager.updates().len(), broadcasts_before);
        assert_eq!(harness.executor.pending(), 0);

        // The in-flight confirmation no longer matches anything.
        let err = harness.policy.on_rebalance_completed(CACHE, 1).unwrap_err();
        assert!(matches!(err, Error::StaleRebalanceConfirmation { .. }));
    }

    #[test]
    fn partition_heal_installs_union() {
        let harness = PolicyHarness::new(&[1, 2, 3, 4]);
        harness.init_cache(2, 8);

        let factory = RendezvousHashFactory;
        let ch_ab = factory
            .create(HashFunction::default(), 2, 8, &[1, 2])
            .unwrap();
        let ch_cd = factory
            .create(HashFunction::default(), 2, 8, &[3, 4])
            .unwrap();
        let partitions = vec![
            CacheTopology::new(5, Some(ch_ab.clone()), None),
            CacheTopology::new(7, Some(ch_cd.clone()), None),
        ];

        harness
            .policy
            .init_cache_from_partitions(CACHE, &partitions)
            .unwrap();

        // Union at the highest partition id, broadcast once, unbalanced.
        let merged = harness.topology();
        assert_eq!(merged.topology_id(), 7);
        assert!(merged.pending_ch().is_none());
        let union = merged.current_ch().unwrap();
        assert_eq!(union.members(), &[1, 2, 3, 4]);
        for segment in 0..8 {
            for owner in ch_ab.owners(segment).iter().chain(ch_cd.owners(segment)) {
                assert!(union.owners(segment).contains(owner));
            }
        }
        assert!(!union.is_balanced());
        assert_eq!(harness.manager.updates().len(), 1);
        assert_eq!(harness.executor.pending(), 0);

        // The next view change notices the imbalance and fixes it.
        harness.policy.update_members_list(vec![1, 2, 3, 4]).unwrap();
        harness.settle();

        let settled = harness.topology();
        assert!(settled.topology_id() > 7);
        let current = settled.current_ch().unwrap();
        assert_eq!(current.members(), &[1, 2, 3, 4]);
        assert!(current.is_balanced());
    }

    #[test]
    fn duplicate_completion_is_stale() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.executor.run_pending();

        harness.policy.on_rebalance_completed(CACHE, 1).unwrap();
        let err = harness.policy.on_rebalance_completed(CACHE, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleRebalanceConfirmation {
                received: 1,
                expected: 2,
                ..
            }
        ));
        // The rejected confirmation left the topology untouched.
        assert_eq!(harness.topology().topology_id(), 2);
    }

    #[test]
    fn rejoining_owner_is_not_a_joiner() {
        let harness = PolicyHarness::new(&[1]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        let topology = harness.policy.add_joiners(CACHE, &[1]).unwrap().unwrap();

        assert_eq!(topology.topology_id(), 0);
        assert!(harness.policy.status(CACHE).unwrap().joiners().is_empty());
        harness.assert_joiners_disjoint_from_owners();

        // The duplicate join still queues a pass; it finds nothing to do.
        harness.executor.run_pending();
        assert!(harness.manager.rebalances().is_empty());
        assert_eq!(harness.topology().topology_id(), 0);
    }

    #[test]
    fn joiner_ahead_of_cluster_view() {
        let harness = PolicyHarness::new(&[1]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();

        // Node 2 joins the cache before the view carrying it lands.
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.executor.run_pending();
        assert!(harness.manager.rebalances().is_empty());
        assert_eq!(harness.topology().topology_id(), 0);
        assert_eq!(harness.policy.status(CACHE).unwrap().joiners(), vec![2]);

        // Once the view lands, the postponed joiner gets its rebalance.
        harness.policy.update_members_list(vec![1, 2]).unwrap();
        harness.settle();

        let settled = harness.topology();
        let current = settled.current_ch().unwrap();
        assert_eq!(current.members(), &[1, 2]);
        assert!(current.is_balanced());
        assert!(harness.policy.status(CACHE).unwrap().joiners().is_empty());
    }

    #[test]
    fn convergence_after_view_shrink() {
        let harness = PolicyHarness::new(&[1, 2, 3, 4]);
        harness.init_cache(2, 16);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.policy.add_joiners(CACHE, &[3]).unwrap();
        harness.policy.add_joiners(CACHE, &[4]).unwrap();
        harness.settle();

        let full = harness.topology();
        assert_eq!(full.current_ch().unwrap().members(), &[1, 2, 3, 4]);
        assert!(full.current_ch().unwrap().is_balanced());
        let full_id = full.topology_id();

        // Two nodes drop out of the view at once.
        harness.policy.update_members_list(vec![1, 2]).unwrap();
        let shrunk = harness.topology();
        assert_eq!(shrunk.topology_id(), full_id);
        assert_eq!(shrunk.current_ch().unwrap().members(), &[1, 2]);

        harness.settle();
        let settled = harness.topology();
        assert!(settled.topology_id() > full_id);
        let current = settled.current_ch().unwrap();
        assert_eq!(current.members(), &[1, 2]);
        assert!(current.is_balanced());
        assert!(settled.pending_ch().is_none());
        harness.assert_joiners_disjoint_from_owners();
    }

    #[test]
    fn lost_submission_recovers_on_next_view() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();

        // The executor loses the queued pass; the policy has no retry of
        // its own.
        assert_eq!(harness.executor.drop_pending(), 1);
        assert_eq!(harness.topology().topology_id(), 0);

        // The next membership event re-triggers for the waiting joiner.
        harness.policy.update_members_list(vec![1, 2]).unwrap();
        harness.executor.run_pending();
        let initiated = harness.manager.last_rebalance().unwrap();
        assert_eq!(initiated.topology_id(), 1);

        harness.policy.on_rebalance_completed(CACHE, 1).unwrap();
        let settled = harness.topology();
        assert!(settled.current_ch().unwrap().is_balanced());
        assert_eq!(settled.current_ch().unwrap().members(), &[1, 2]);
    }

    #[test]
    fn topology_ids_are_monotonic_across_broadcasts() {
        let harness = PolicyHarness::new(&[1, 2, 3]);
        harness.init_cache(2, 8);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.settle();
        harness.policy.add_joiners(CACHE, &[3]).unwrap();
        harness.settle();
        harness.policy.update_members_list(vec![1, 2]).unwrap();
        harness.settle();

        let updates = harness.manager.updates();
        assert!(!updates.is_empty());
        for pair in updates.windows(2) {
            // Shrinks repeat an id; nothing ever goes backwards.
            assert!(pair[1].1.topology_id() >= pair[0].1.topology_id());
        }
    }

    #[test]
    fn engine_metrics_track_activity() {
        let harness = PolicyHarness::new(&[1, 2]);
        harness.init_cache(2, 4);
        harness.policy.add_joiners(CACHE, &[1]).unwrap();
        harness.policy.add_joiners(CACHE, &[2]).unwrap();
        harness.settle();

        let snapshot = harness.policy.metrics().snapshot();
        assert!(snapshot.topologies_installed >= 3);
        assert!(snapshot.broadcasts_sent >= 1);
        assert!(snapshot.rebalances_triggered >= 1);
        assert_eq!(snapshot.stale_confirmations, 0);
    }
}
