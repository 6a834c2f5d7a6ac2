//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing event count.
///
/// Counters are anonymous; what each one measures is captured by its
/// field position in [`TopologyMetrics`] and [`MetricsSnapshot`].
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// A counter starting at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Record one event.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// The number of events recorded so far.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the rebalance policy engine.
#[derive(Debug)]
pub struct TopologyMetrics {
    /// Topologies installed across all caches.
    pub topologies_installed: Counter,
    /// `update_consistent_hash` broadcasts handed to the topology manager.
    pub broadcasts_sent: Counter,
    /// Rebalance passes queued onto the executor.
    pub rebalances_triggered: Counter,
    /// Rebalance passes that found one already in progress and exited.
    pub rebalances_coalesced: Counter,
    /// Rebalance confirmations rejected as stale.
    pub stale_confirmations: Counter,
}

impl TopologyMetrics {
    /// A fresh set of counters, all at zero.
    pub const fn new() -> Self {
        Self {
            topologies_installed: Counter::new(),
            broadcasts_sent: Counter::new(),
            rebalances_triggered: Counter::new(),
            rebalances_coalesced: Counter::new(),
            stale_confirmations: Counter::new(),
        }
    }

    /// Point-in-time copy of every counter, for logging or export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            topologies_installed: self.topologies_installed.get(),
            broadcasts_sent: self.broadcasts_sent.get(),
            rebalances_triggered: self.rebalances_triggered.get(),
            rebalances_coalesced: self.rebalances_coalesced.get(),
            stale_confirmations: self.stale_confirmations.get(),
        }
    }
}

impl Default for TopologyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Values of every engine counter at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub topologies_installed: u64,
    pub broadcasts_sent: u64,
    pub rebalances_triggered: u64,
    pub rebalances_coalesced: u64,
    pub stale_confirmations: u64,
}
