//! Per-cache mutable state.

use crate::types::Address;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use super::cache_topology::{CacheJoinInfo, CacheTopology};

/// The mutable state the policy keeps for one cache.
///
/// The joiner list doubles as the cache's serialization lock: every
/// state-mutating operation holds it for the whole read-modify-write
/// sequence. The latest topology lives in an [`ArcSwap`] that is replaced
/// only while that lock is held, so [`topology`](CacheStatus::topology)
/// reads are lock-free and always observe a whole value.
#[derive(Debug)]
pub struct CacheStatus {
    join_info: CacheJoinInfo,
    /// Addresses awaiting inclusion, in arrival order. Guarded by the
    /// status lock.
    joiners: Mutex<Vec<Address>>,
    topology: ArcSwap<CacheTopology>,
}

impl CacheStatus {
    /// Create the status for a cache that has not assigned members yet.
    pub fn new(join_info: CacheJoinInfo) -> Self {
        Self {
            join_info,
            joiners: Mutex::new(Vec::new()),
            topology: ArcSwap::from_pointee(CacheTopology::initial()),
        }
    }

    /// The immutable join parameters of this cache.
    pub fn join_info(&self) -> &CacheJoinInfo {
        &self.join_info
    }

    /// Lock-free snapshot of the latest topology.
    pub fn topology(&self) -> Arc<CacheTopology> {
        self.topology.load_full()
    }

    /// Snapshot of the joiners awaiting inclusion.
    pub fn joiners(&self) -> Vec<Address> {
        self.joiners.lock().clone()
    }

    /// Acquire the status lock, yielding the joiner list.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Address>> {
        self.joiners.lock()
    }

    /// Replace the topology and prune joiners that became owners.
    ///
    /// Must be called with this status's lock held; `joiners` is the
    /// guarded list from that lock.
    pub(crate) fn install(
        &self,
        topology: CacheTopology,
        joiners: &mut Vec<Address>,
    ) -> Arc<CacheTopology> {
        if let Some(current) = topology.current_ch() {
            joiners.retain(|joiner| !current.contains(*joiner));
        }
        let installed = Arc::new(topology);
        self.topology.store(Arc::clone(&installed));
        installed
    }
}
