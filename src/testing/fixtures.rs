//! Deterministic stand-ins for the cluster collaborators.

use crate::cluster::{ClusterTopologyManager, Job, JobExecutor, Transport};
use crate::topology::CacheTopology;
use crate::types::Address;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

/// A transport with a fixed member view.
#[derive(Debug)]
pub struct StaticTransport {
    members: Vec<Address>,
}

impl StaticTransport {
    /// Create a transport that reports the given members.
    pub fn new(members: Vec<Address>) -> Self {
        Self { members }
    }
}

impl Transport for StaticTransport {
    fn members(&self) -> Vec<Address> {
        self.members.clone()
    }
}

/// A topology manager that records every call for later assertion.
#[derive(Debug, Default)]
pub struct RecordingTopologyManager {
    updates: Mutex<Vec<(String, CacheTopology)>>,
    rebalances: Mutex<Vec<(String, CacheTopology)>>,
}

impl RecordingTopologyManager {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `update_consistent_hash` broadcasts so far, in order.
    pub fn updates(&self) -> Vec<(String, CacheTopology)> {
        self.updates.lock().clone()
    }

    /// All `rebalance` initiations so far, in order.
    pub fn rebalances(&self) -> Vec<(String, CacheTopology)> {
        self.rebalances.lock().clone()
    }

    /// The last recorded broadcast, if any.
    pub fn last_update(&self) -> Option<CacheTopology> {
        self.updates.lock().last().map(|(_, topology)| topology.clone())
    }

    /// The last initiated rebalance, if any.
    pub fn last_rebalance(&self) -> Option<CacheTopology> {
        self.rebalances
            .lock()
            .last()
            .map(|(_, topology)| topology.clone())
    }
}

impl ClusterTopologyManager for RecordingTopologyManager {
    fn update_consistent_hash(&self, cache_name: &str, topology: &CacheTopology) {
        trace!(cache = cache_name, %topology, "recording topology broadcast");
        self.updates
            .lock()
            .push((cache_name.to_owned(), topology.clone()));
    }

    fn rebalance(&self, cache_name: &str, topology: &CacheTopology) {
        trace!(cache = cache_name, %topology, "recording rebalance start");
        self.rebalances
            .lock()
            .push((cache_name.to_owned(), topology.clone()));
    }
}

/// An executor that queues jobs until the test drains them.
///
/// Submissions made while draining (a completion triggering the next
/// rebalance, say) land back in the queue and run in the same drain.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Job>>,
}

impl ManualExecutor {
    /// Create an executor with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued jobs (and any they queue) on the caller thread, in
    /// submission order.
    ///
    /// Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Discard queued jobs without running them, modeling lost
    /// submissions.
    pub fn drop_pending(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl JobExecutor for ManualExecutor {
    fn submit(&self, job: Job) {
        self.queue.lock().push_back(job);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}
