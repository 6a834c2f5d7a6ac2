//! Testing utilities for the topology engine.
//!
//! The fixtures here stand in for the cluster-facing collaborators so
//! that policy behavior can be driven deterministically from a single
//! thread:
//!
//! - [`StaticTransport`]: a fixed membership view.
//! - [`RecordingTopologyManager`]: records every broadcast for
//!   assertion instead of putting it on the wire.
//! - [`ManualExecutor`]: queues rebalance passes until the test drains
//!   them with [`run_pending`](ManualExecutor::run_pending).
//!
//! # Example
//!
//! ```rust
//! use crema_topology::testing::{ManualExecutor, RecordingTopologyManager, StaticTransport};
//! use crema_topology::RebalancePolicy;
//! use std::sync::Arc;
//!
//! let executor = Arc::new(ManualExecutor::new());
//! let manager = Arc::new(RecordingTopologyManager::new());
//! let policy = RebalancePolicy::new(
//!     Arc::new(StaticTransport::new(vec![1, 2])),
//!     manager.clone(),
//!     executor.clone(),
//! );
//! policy.start();
//! assert_eq!(policy.cluster_members(), vec![1, 2]);
//! ```

mod fixtures;
mod policy_scenarios;

pub use fixtures::{ManualExecutor, RecordingTopologyManager, StaticTransport};
