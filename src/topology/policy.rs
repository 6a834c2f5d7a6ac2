//! The rebalance policy: event sink and decision engine.

use crate::cluster::{ClusterTopologyManager, JobExecutor, Transport};
use crate::error::{Error, Result};
use crate::metrics::TopologyMetrics;
use crate::types::{Address, TopologyId};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::cache_topology::{CacheJoinInfo, CacheTopology};
use super::status::CacheStatus;

/// Drives the assignment of hash-space segments to cluster members as
/// nodes join and leave.
///
/// The policy is a passive object invoked from multiple threads: the
/// transport's view-change thread, join/leave handler threads, the
/// rebalance-confirmation thread, and the executor workers that run
/// rebalance decision passes. All state transitions for one cache are
/// serialized under that cache's status lock; different caches proceed
/// independently.
#[derive(Debug)]
pub struct RebalancePolicy {
    shared: Arc<PolicyShared>,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn JobExecutor>,
}

#[derive(Debug)]
struct PolicyShared {
    /// Snapshot of the transport's member view, replaced wholesale on
    /// every view change.
    cluster_members: ArcSwap<Vec<Address>>,
    caches: DashMap<String, Arc<CacheStatus>>,
    manager: Arc<dyn ClusterTopologyManager>,
    metrics: TopologyMetrics,
}

impl RebalancePolicy {
    /// Create a policy wired to its collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        manager: Arc<dyn ClusterTopologyManager>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            shared: Arc::new(PolicyShared {
                cluster_members: ArcSwap::from_pointee(Vec::new()),
                caches: DashMap::new(),
                manager,
                metrics: TopologyMetrics::new(),
            }),
            transport,
            executor,
        }
    }

    /// Start building a policy.
    pub fn builder() -> RebalancePolicyBuilder {
        RebalancePolicyBuilder::new()
    }

    /// Seed the member snapshot from the transport.
    ///
    /// Must run after the collaborators are wired and before any
    /// cache-topology activity.
    pub fn start(&self) {
        let members = self.transport.members();
        debug!(?members, "starting rebalance policy");
        self.shared.cluster_members.store(Arc::new(members));
    }

    /// The latest cluster view known to the policy.
    pub fn cluster_members(&self) -> Vec<Address> {
        self.shared.cluster_members.load().as_ref().clone()
    }

    /// Engine counters.
    pub fn metrics(&self) -> &TopologyMetrics {
        &self.shared.metrics
    }

    /// Register a cache with its join parameters.
    ///
    /// Idempotent: a second call for the same cache is a no-op; the first
    /// registration wins. No topology is installed or broadcast.
    pub fn init_cache(&self, cache_name: &str, join_info: CacheJoinInfo) {
        trace!(cache = cache_name, "initializing rebalance policy for cache");
        self.shared
            .caches
            .entry(cache_name.to_owned())
            .or_insert_with(|| Arc::new(CacheStatus::new(join_info)));
    }

    /// Absorb the topologies of merging partitions for a cache.
    ///
    /// Installs the union of every partition's hashes at the highest seen
    /// topology id and broadcasts it. The union is intentionally
    /// unbalanced; the next membership event restores the balance target.
    pub fn init_cache_from_partitions(
        &self,
        cache_name: &str,
        partition_topologies: &[CacheTopology],
    ) -> Result<()> {
        trace!(
            cache = cache_name,
            partitions = partition_topologies.len(),
            "initializing rebalance policy from pre-existing partitions"
        );
        if partition_topologies.is_empty() {
            return Ok(());
        }
        let status = self
            .status(cache_name)
            .ok_or_else(|| Error::UnknownCache(cache_name.to_owned()))?;
        let factory = Arc::clone(status.join_info().factory());

        let mut joiners = status.lock();

        let mut union_topology_id = TopologyId::MIN;
        let mut current_union = None;
        let mut pending_union = None;
        for topology in partition_topologies {
            union_topology_id = union_topology_id.max(topology.topology_id());
            if let Some(current) = topology.current_ch() {
                current_union = Some(match current_union.take() {
                    Some(merged) => factory.union(&merged, current)?,
                    None => current.clone(),
                });
            }
            if let Some(pending) = topology.pending_ch() {
                pending_union = Some(match pending_union.take() {
                    Some(merged) => factory.union(&merged, pending)?,
                    None => pending.clone(),
                });
            }
        }

        let merged = CacheTopology::new(union_topology_id, current_union, pending_union);
        self.shared
            .install_topology(cache_name, &status, &mut joiners, merged, true);
        // TODO: trigger a rebalance here instead of waiting for the next
        // view change to notice the union is unbalanced.
        Ok(())
    }

    /// Record joiners for a cache and kick off their inclusion.
    ///
    /// Returns the (possibly updated) topology, or `None` when the cache
    /// is unknown. The very first joiners get an initial topology that is
    /// *not* broadcast: it travels back to them as this return value.
    pub fn add_joiners(
        &self,
        cache_name: &str,
        joiners: &[Address],
    ) -> Result<Option<Arc<CacheTopology>>> {
        let Some(status) = self.status(cache_name) else {
            trace!(
                cache = cache_name,
                "ignoring joiners for cache, not initialized yet"
            );
            return Ok(None);
        };

        let mut pending_joiners = status.lock();
        add_unique(&mut pending_joiners, joiners);

        let topology = status.topology();
        match topology.current_ch() {
            None => {
                self.shared
                    .install_initial_topology(cache_name, &status, &mut pending_joiners)?;
            }
            Some(current) => {
                // A member re-joining the cache it already owns is not a
                // joiner; keep the joiner list disjoint from the owners.
                pending_joiners.retain(|joiner| !current.contains(*joiner));
                self.trigger_rebalance(cache_name, &status);
            }
        }
        Ok(Some(status.topology()))
    }

    /// Drop leavers from a cache's hashes.
    pub fn remove_leavers(&self, cache_name: &str, leavers: &[Address]) -> Result<()> {
        let Some(status) = self.status(cache_name) else {
            trace!(
                cache = cache_name,
                "ignoring leavers for cache, not initialized yet"
            );
            return Ok(());
        };

        let mut joiners = status.lock();
        if status.topology().current_ch().is_none() {
            trace!(cache = cache_name, "cache has no topology yet, nothing to shrink");
            return Ok(());
        }

        // Leaves show up in the current and pending hashes at the same
        // time, so start from the full cluster view minus the leavers.
        let mut new_members = self.cluster_members();
        new_members.retain(|member| !leavers.contains(member));

        self.update_cache_members(cache_name, &status, &mut joiners, new_members)
    }

    /// Replace the cluster view and reconcile every cache against it.
    pub fn update_members_list(&self, new_cluster_members: Vec<Address>) -> Result<()> {
        trace!(
            members = ?new_cluster_members,
            "updating cluster members for all caches"
        );
        self.shared
            .cluster_members
            .store(Arc::new(new_cluster_members.clone()));

        for entry in self.shared.caches.iter() {
            let cache_name = entry.key();
            let status = entry.value();
            let mut joiners = status.lock();

            let topology = status.topology();
            // The consistent hash may not be initialized yet.
            let Some(current) = topology.current_ch() else {
                continue;
            };

            let current_valid = current
                .members()
                .iter()
                .all(|member| new_cluster_members.contains(member));
            let pending_valid = topology.pending_ch().map_or(true, |pending| {
                pending
                    .members()
                    .iter()
                    .all(|member| new_cluster_members.contains(member))
            });
            if !current_valid || !pending_valid {
                let surviving: Vec<Address> = current
                    .members()
                    .iter()
                    .copied()
                    .filter(|member| new_cluster_members.contains(member))
                    .collect();
                self.update_cache_members(cache_name, status, &mut joiners, surviving)?;
            }

            let topology = status.topology();
            let unbalanced = topology
                .current_ch()
                .is_some_and(|current| !current.is_balanced());
            if unbalanced || !joiners.is_empty() {
                // Rebalance after a leave. Joiners can also race ahead of
                // the view that carries them; the rebalance for those runs
                // once the view lands here.
                self.trigger_rebalance(cache_name, status);
            }
        }
        Ok(())
    }

    /// Promote the pending hash once the whole cluster confirmed it.
    ///
    /// Fails with [`Error::StaleRebalanceConfirmation`] when the topology
    /// id does not match the outstanding rebalance, or when no rebalance
    /// is outstanding; the topology is left untouched.
    pub fn on_rebalance_completed(
        &self,
        cache_name: &str,
        topology_id: TopologyId,
    ) -> Result<()> {
        debug!(
            cache = cache_name,
            topology_id, "finished cluster-wide rebalance"
        );
        let status = self
            .status(cache_name)
            .ok_or_else(|| Error::UnknownCache(cache_name.to_owned()))?;

        let mut joiners = status.lock();
        let topology = status.topology();
        if topology_id != topology.topology_id() {
            self.shared.metrics.stale_confirmations.inc();
            return Err(Error::StaleRebalanceConfirmation {
                cache: cache_name.to_owned(),
                received: topology_id,
                expected: topology.topology_id(),
            });
        }
        let Some(pending) = topology.pending_ch().cloned() else {
            // The id matches but the pending hash was dropped by a
            // concurrent shrink; the confirmation no longer corresponds to
            // an outstanding rebalance.
            self.shared.metrics.stale_confirmations.inc();
            return Err(Error::StaleRebalanceConfirmation {
                cache: cache_name.to_owned(),
                received: topology_id,
                expected: topology.topology_id(),
            });
        };

        let promoted = CacheTopology::new(topology_id + 1, Some(pending.clone()), None);
        self.shared
            .install_topology(cache_name, &status, &mut joiners, promoted, true);

        if joiners.is_empty() && pending.is_balanced() {
            trace!(cache = cache_name, "consistent hash is now balanced");
        } else {
            // Postponed joiners, or a leave during the transfer: go again.
            self.trigger_rebalance(cache_name, &status);
        }
        Ok(())
    }

    /// Lock-free snapshot of a cache's topology.
    pub fn get_topology(&self, cache_name: &str) -> Option<Arc<CacheTopology>> {
        self.status(cache_name).map(|status| status.topology())
    }

    pub(crate) fn status(&self, cache_name: &str) -> Option<Arc<CacheStatus>> {
        self.shared
            .caches
            .get(cache_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Shrink a cache onto `new_members`. Lock held.
    ///
    /// A pure membership shrink keeps the topology id: only the hash
    /// values change, and a new id is minted by the rebalance that
    /// follows.
    fn update_cache_members(
        &self,
        cache_name: &str,
        status: &Arc<CacheStatus>,
        joiners: &mut Vec<Address>,
        new_members: Vec<Address>,
    ) -> Result<()> {
        let factory = Arc::clone(status.join_info().factory());
        let topology = status.topology();
        let Some(current) = topology.current_ch() else {
            trace!(cache = cache_name, "cache has no topology yet, nothing to shrink");
            return Ok(());
        };

        let new_pending = match topology.pending_ch() {
            Some(pending) => {
                let pending_members: Vec<Address> = new_members
                    .iter()
                    .copied()
                    .filter(|member| pending.contains(*member))
                    .collect();
                if pending_members.is_empty() {
                    trace!(cache = cache_name, "zero pending members remaining");
                    None
                } else {
                    Some(factory.update_members(pending, &pending_members)?)
                }
            }
            None => None,
        };

        let current_members: Vec<Address> = new_members
            .iter()
            .copied()
            .filter(|member| current.contains(*member))
            .collect();
        let new_current = if current_members.is_empty() {
            trace!(cache = cache_name, "zero current members remaining");
            // The pending hash may still be populated by joiners; the
            // cache survives on those.
            new_pending.clone()
        } else {
            Some(factory.update_members(current, &current_members)?)
        };

        let has_members = new_current.is_some();
        let shrunk = CacheTopology::new(topology.topology_id(), new_current, new_pending);

        // No members left means nothing to broadcast to.
        self.shared
            .install_topology(cache_name, status, joiners, shrunk, has_members);

        // And nothing to rebalance either.
        if has_members {
            self.trigger_rebalance(cache_name, status);
        }
        Ok(())
    }

    /// Queue an asynchronous rebalance pass for a cache.
    ///
    /// Submissions coalesce: a pass that finds a rebalance already in
    /// progress exits without touching anything.
    fn trigger_rebalance(&self, cache_name: &str, status: &Arc<CacheStatus>) {
        trace!(cache = cache_name, "queueing rebalance pass");
        self.shared.metrics.rebalances_triggered.inc();

        let shared = Arc::clone(&self.shared);
        let status = Arc::clone(status);
        let cache_name = cache_name.to_owned();
        self.executor.submit(Box::new(move || {
            if let Err(error) = shared.do_rebalance(&cache_name, &status) {
                warn!(cache = %cache_name, %error, "rebalance pass failed");
            }
        }));
    }
}

impl PolicyShared {
    /// Install a topology and optionally broadcast it. Lock held.
    fn install_topology(
        &self,
        cache_name: &str,
        status: &CacheStatus,
        joiners: &mut Vec<Address>,
        topology: CacheTopology,
        broadcast: bool,
    ) -> Arc<CacheTopology> {
        trace!(cache = cache_name, %topology, "updating cache topology");
        let installed = status.install(topology, joiners);
        self.metrics.topologies_installed.inc();
        if broadcast {
            self.metrics.broadcasts_sent.inc();
            self.manager.update_consistent_hash(cache_name, &installed);
        }
        installed
    }

    /// Build and install the first topology of a cache from its joiners.
    /// Lock held.
    ///
    /// The install is not broadcast: the joining node learns the topology
    /// from the join response instead.
    fn install_initial_topology(
        &self,
        cache_name: &str,
        status: &CacheStatus,
        joiners: &mut Vec<Address>,
    ) -> Result<()> {
        let join_info = status.join_info();
        let balanced = join_info.factory().create(
            join_info.hash_fn(),
            join_info.num_owners(),
            join_info.num_segments(),
            joiners,
        )?;
        let topology_id = status.topology().topology_id() + 1;
        let initial = CacheTopology::new(topology_id, Some(balanced), None);
        debug!(cache = cache_name, topology = %initial, "installing initial topology");
        self.install_topology(cache_name, status, joiners, initial, false);
        Ok(())
    }

    /// One rebalance decision pass: the serialization point for all
    /// trigger submissions.
    fn do_rebalance(&self, cache_name: &str, status: &CacheStatus) -> Result<()> {
        let mut joiners = status.lock();
        let topology = status.topology();

        if topology.rebalance_in_progress() {
            trace!(
                cache = cache_name,
                topology = %topology,
                "ignoring rebalance request, one is already in progress"
            );
            self.metrics.rebalances_coalesced.inc();
            return Ok(());
        }

        let mut new_members = topology.members();
        if new_members.is_empty() {
            trace!(cache = cache_name, "ignoring rebalance request, cache has no members");
            return Ok(());
        }

        add_unique(&mut new_members, &joiners);
        let cluster_members = self.cluster_members.load();
        new_members.retain(|member| cluster_members.contains(member));
        if new_members.is_empty() {
            // A concurrent view change emptied the cache; the member-list
            // path owns that transition.
            trace!(cache = cache_name, "no cache members left in the cluster view");
            return Ok(());
        }

        let Some(current) = topology.current_ch() else {
            // The last member left after this pass was queued but before
            // it ran; fall back to a fresh initial topology.
            return self.install_initial_topology(cache_name, status, &mut joiners);
        };

        trace!(cache = cache_name, members = ?new_members, "rebalancing consistent hash");
        let factory = status.join_info().factory();
        let updated = factory.update_members(current, &new_members)?;
        let balanced = factory.rebalance(&updated);
        if &balanced == current {
            trace!(cache = cache_name, "balanced hash equals current, not rebalancing");
            return Ok(());
        }

        let rebalancing = CacheTopology::new(
            topology.topology_id() + 1,
            Some(current.clone()),
            Some(balanced),
        );
        debug!(cache = cache_name, topology = %rebalancing, "starting rebalance");
        let installed = self.install_topology(cache_name, status, &mut joiners, rebalancing, false);

        // Release the status lock before the cluster-wide protocol; the
        // broadcast may block and must not stall concurrent events.
        drop(joiners);
        self.manager.rebalance(cache_name, &installed);
        Ok(())
    }
}

/// Append the members of `extra` not already present, preserving order.
fn add_unique(members: &mut Vec<Address>, extra: &[Address]) {
    for &member in extra {
        if !members.contains(&member) {
            members.push(member);
        }
    }
}

/// Builder for a [`RebalancePolicy`].
pub struct RebalancePolicyBuilder {
    transport: Option<Arc<dyn Transport>>,
    manager: Option<Arc<dyn ClusterTopologyManager>>,
    executor: Option<Arc<dyn JobExecutor>>,
}

impl RebalancePolicyBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            transport: None,
            manager: None,
            executor: None,
        }
    }

    /// Set the membership oracle.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the broadcast sink.
    pub fn topology_manager(mut self, manager: Arc<dyn ClusterTopologyManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the job executor. Defaults to a [`TokioJobExecutor`] bound to
    /// the current runtime.
    ///
    /// [`TokioJobExecutor`]: crate::cluster::TokioJobExecutor
    pub fn executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the policy.
    ///
    /// # Panics
    ///
    /// Panics if the transport or topology manager is missing, or if no
    /// executor was set and there is no ambient tokio runtime.
    pub fn build(self) -> RebalancePolicy {
        let transport = self.transport.expect("transport is required");
        let manager = self.manager.expect("topology manager is required");
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(crate::cluster::TokioJobExecutor::new()));
        RebalancePolicy::new(transport, manager, executor)
    }
}

impl Default for RebalancePolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
