//! Walk the rebalance policy through a cluster's life.
//!
//! This demo drives the policy with scripted membership events and prints
//! every topology it would broadcast:
//! - Node 1 bootstraps the cache and gets the initial topology
//! - Nodes 2 and 3 join, each join committing through a rebalance
//! - Node 3 leaves and the cache shrinks, then rebalances back to target
//! - Two partitions heal and their topologies merge
//!
//! Run with:
//!   RUST_LOG=trace cargo run --example cluster-lifecycle

use crema_topology::testing::{ManualExecutor, RecordingTopologyManager, StaticTransport};
use crema_topology::{
    CacheJoinInfo, ConsistentHashFactory, HashFunction, RebalancePolicy, RendezvousHashFactory,
};
use std::sync::Arc;

const CACHE: &str = "users";

fn main() -> crema_topology::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        )
        .init();

    let manager = Arc::new(RecordingTopologyManager::new());
    let executor = Arc::new(ManualExecutor::new());
    let policy = RebalancePolicy::builder()
        .transport(Arc::new(StaticTransport::new(vec![1, 2, 3])))
        .topology_manager(manager.clone())
        .executor(executor.clone())
        .build();
    policy.start();

    let join_info = CacheJoinInfo::new(
        HashFunction::default(),
        2,
        8,
        Arc::new(RendezvousHashFactory),
    )?;
    policy.init_cache(CACHE, join_info);

    // Node 1 bootstraps the cache; the initial topology is its join
    // response, not a broadcast.
    let topology = policy.add_joiners(CACHE, &[1])?.unwrap();
    println!("bootstrap        -> {}", topology);

    // Nodes 2 and 3 join; each join queues a rebalance pass and each
    // initiated rebalance is confirmed cluster-wide.
    for node in [2, 3] {
        policy.add_joiners(CACHE, &[node])?;
        settle(&policy, &manager, &executor)?;
        println!("after join of {}  -> {}", node, policy.get_topology(CACHE).unwrap());
    }

    // Node 3 leaves: the shrink keeps the topology id, the follow-up
    // rebalance mints a new one.
    policy.update_members_list(vec![1, 2])?;
    settle(&policy, &manager, &executor)?;
    println!("after leave of 3 -> {}", policy.get_topology(CACHE).unwrap());

    // Two partitions heal: install the union of their topologies, then
    // let the next view change restore balance.
    let factory = RendezvousHashFactory;
    let left = factory.create(HashFunction::default(), 2, 8, &[1, 2])?;
    let right = factory.create(HashFunction::default(), 2, 8, &[3])?;
    policy.update_members_list(vec![1, 2, 3])?;
    policy.init_cache_from_partitions(
        CACHE,
        &[
            crema_topology::CacheTopology::new(20, Some(left), None),
            crema_topology::CacheTopology::new(22, Some(right), None),
        ],
    )?;
    println!("after heal       -> {}", policy.get_topology(CACHE).unwrap());
    policy.update_members_list(vec![1, 2, 3])?;
    settle(&policy, &manager, &executor)?;
    println!("rebalanced       -> {}", policy.get_topology(CACHE).unwrap());

    println!("engine counters  -> {:?}", policy.metrics().snapshot());
    Ok(())
}

/// Drain queued rebalance passes and confirm every initiated rebalance,
/// standing in for the cluster-wide state transfer.
fn settle(
    policy: &RebalancePolicy,
    manager: &RecordingTopologyManager,
    executor: &ManualExecutor,
) -> crema_topology::Result<()> {
    let mut confirmed = 0;
    loop {
        executor.run_pending();
        let rebalances = manager.rebalances();
        if rebalances.len() == confirmed {
            return Ok(());
        }
        for (cache, topology) in &rebalances[confirmed..] {
            policy.on_rebalance_completed(cache, topology.topology_id())?;
        }
        confirmed = rebalances.len();
    }
}
