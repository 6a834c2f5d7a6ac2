//! Collaborator contracts at the cluster boundary.
//!
//! The policy is a passive library object; everything that touches the
//! wire lives behind these traits. The [`Transport`] supplies the initial
//! member list, the [`ClusterTopologyManager`] fans topologies out to the
//! cluster and runs the state-transfer protocol, and the [`JobExecutor`]
//! runs rebalance decision passes off the caller thread.

mod executor;

pub use executor::{Job, JobExecutor, TokioJobExecutor};

use crate::topology::CacheTopology;
use crate::types::Address;
use std::fmt;

/// Membership oracle.
///
/// Supplies the member list once at [`start`]; later changes are pushed
/// into the policy via `update_members_list`.
///
/// [`start`]: crate::topology::RebalancePolicy::start
pub trait Transport: Send + Sync + fmt::Debug {
    /// The current cluster members, in view order.
    fn members(&self) -> Vec<Address>;
}

/// Sink for topology broadcasts and the state-transfer protocol.
pub trait ClusterTopologyManager: Send + Sync + fmt::Debug {
    /// Fire-and-forget broadcast of the latest topology to all members.
    ///
    /// Called with the cache's status lock held; implementations must only
    /// hand the topology off to their own queue, never block.
    fn update_consistent_hash(&self, cache_name: &str, topology: &CacheTopology);

    /// Initiate the cluster-wide state-transfer protocol toward
    /// `topology`'s pending hash.
    ///
    /// Called outside the status lock and may block. Completion arrives
    /// asynchronously via `on_rebalance_completed` with the topology id
    /// passed here.
    fn rebalance(&self, cache_name: &str, topology: &CacheTopology);
}
