//! Cluster rebalance policy engine for a distributed cache.
//!
//! This crate decides *who owns what* as a cluster changes shape. For
//! every named cache it maintains a monotonically versioned
//! [`CacheTopology`], a current consistent-hash assignment plus an
//! optional pending one, and orchestrates the transitions between them
//! so that ownership stays deterministic, progress is made whenever the
//! cluster is imbalanced, and concurrent membership events cannot corrupt
//! the topology.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Event sources                        │
//! │   view changes · cache joins · leavers · confirmations   │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                    RebalancePolicy                       │
//! │   per-cache CacheStatus (lock + joiners + topology)      │
//! └──────────────────────────────────────────────────────────┘
//!        │                   │                    │
//!        ▼                   ▼                    ▼
//! ┌─────────────┐    ┌───────────────┐    ┌──────────────┐
//! │ JobExecutor │    │ ClusterTopo-  │    │ ConsistentH. │
//! │ (rebalance  │    │ logyManager   │    │ Factory      │
//! │  passes)    │    │ (broadcasts)  │    │ (CH algebra) │
//! └─────────────┘    └───────────────┘    └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_topology::{
//!     CacheJoinInfo, HashFunction, RebalancePolicy, RendezvousHashFactory,
//! };
//! use crema_topology::testing::{ManualExecutor, RecordingTopologyManager, StaticTransport};
//! use std::sync::Arc;
//!
//! # fn main() -> crema_topology::Result<()> {
//! let transport = Arc::new(StaticTransport::new(vec![1, 2, 3]));
//! let manager = Arc::new(RecordingTopologyManager::new());
//! let executor = Arc::new(ManualExecutor::new());
//!
//! let policy = RebalancePolicy::new(transport, manager, executor.clone());
//! policy.start();
//!
//! let join_info = CacheJoinInfo::new(
//!     HashFunction::default(),
//!     2,  // owners per segment
//!     16, // segments
//!     Arc::new(RendezvousHashFactory),
//! )?;
//! policy.init_cache("users", join_info);
//!
//! // The first joiner gets the initial topology as the join response.
//! let topology = policy.add_joiners("users", &[1])?.unwrap();
//! assert_eq!(topology.topology_id(), 0);
//!
//! // A second joiner queues an asynchronous rebalance pass.
//! policy.add_joiners("users", &[2])?;
//! executor.run_pending();
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency model
//!
//! - All transitions for one cache are serialized under that cache's
//!   status lock; caches never block each other.
//! - Topology ids strictly increase per cache, except for pure membership
//!   shrinks, which only replace the hash values.
//! - [`RebalancePolicy::get_topology`] is a lock-free whole-value read.
//! - Duplicate or stale rebalance submissions are benign: a pass that
//!   finds a rebalance already pending exits without touching anything.

pub mod cluster;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod testing;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use cluster::{ClusterTopologyManager, Job, JobExecutor, TokioJobExecutor, Transport};
pub use error::{Error, HashError, Result};
pub use hash::{ConsistentHash, ConsistentHashFactory, RendezvousHashFactory};
pub use metrics::{Counter, MetricsSnapshot, TopologyMetrics};
pub use topology::{
    CacheJoinInfo, CacheStatus, CacheTopology, RebalancePolicy, RebalancePolicyBuilder,
};
pub use types::{Address, HashFunction, TopologyId, INITIAL_TOPOLOGY_ID};
