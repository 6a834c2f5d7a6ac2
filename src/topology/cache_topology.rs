//! The versioned topology record and per-cache join parameters.

use crate::error::HashError;
use crate::hash::{ConsistentHash, ConsistentHashFactory};
use crate::types::{Address, HashFunction, TopologyId, INITIAL_TOPOLOGY_ID};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A versioned pair of consistent hashes for one cache.
///
/// `current` is the assignment clients should route by. A non-`None`
/// `pending` means a rebalance is in progress and ownership is
/// transitioning from `current` to `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTopology {
    topology_id: TopologyId,
    current_ch: Option<ConsistentHash>,
    pending_ch: Option<ConsistentHash>,
}

impl CacheTopology {
    /// Create a topology record.
    pub fn new(
        topology_id: TopologyId,
        current_ch: Option<ConsistentHash>,
        pending_ch: Option<ConsistentHash>,
    ) -> Self {
        Self {
            topology_id,
            current_ch,
            pending_ch,
        }
    }

    /// The topology of a cache that has not assigned any members yet.
    pub fn initial() -> Self {
        Self::new(INITIAL_TOPOLOGY_ID, None, None)
    }

    /// The topology version.
    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    /// The assignment clients route by, if any members were assigned.
    pub fn current_ch(&self) -> Option<&ConsistentHash> {
        self.current_ch.as_ref()
    }

    /// The target assignment of an in-progress rebalance.
    pub fn pending_ch(&self) -> Option<&ConsistentHash> {
        self.pending_ch.as_ref()
    }

    /// Whether a rebalance is in progress.
    pub fn rebalance_in_progress(&self) -> bool {
        self.pending_ch.is_some()
    }

    /// The effective member set: pending members first, then the current
    /// members not already covered.
    pub fn members(&self) -> Vec<Address> {
        let mut members = Vec::new();
        if let Some(pending) = &self.pending_ch {
            members.extend_from_slice(pending.members());
        }
        if let Some(current) = &self.current_ch {
            for &member in current.members() {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
        members
    }
}

impl fmt::Display for CacheTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheTopology{{id={}", self.topology_id)?;
        match &self.current_ch {
            Some(current) => write!(f, ", current={}", current)?,
            None => write!(f, ", current=none")?,
        }
        match &self.pending_ch {
            Some(pending) => write!(f, ", pending={}", pending)?,
            None => write!(f, ", pending=none")?,
        }
        write!(f, "}}")
    }
}

/// Immutable per-cache parameters supplied when a cache first joins.
#[derive(Clone)]
pub struct CacheJoinInfo {
    hash_fn: HashFunction,
    num_owners: usize,
    num_segments: usize,
    factory: Arc<dyn ConsistentHashFactory>,
}

impl CacheJoinInfo {
    /// Create join parameters for a cache.
    pub fn new(
        hash_fn: HashFunction,
        num_owners: usize,
        num_segments: usize,
        factory: Arc<dyn ConsistentHashFactory>,
    ) -> Result<Self, HashError> {
        if num_owners < 1 || num_segments < 1 {
            return Err(HashError::InvalidParameters {
                num_owners,
                num_segments,
            });
        }
        Ok(Self {
            hash_fn,
            num_owners,
            num_segments,
            factory,
        })
    }

    /// The hash function identity for this cache.
    pub fn hash_fn(&self) -> HashFunction {
        self.hash_fn
    }

    /// The replication target per segment.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// The number of hash-space segments.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// The consistent hash factory for this cache.
    pub fn factory(&self) -> &Arc<dyn ConsistentHashFactory> {
        &self.factory
    }
}

impl fmt::Debug for CacheJoinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheJoinInfo")
            .field("hash_fn", &self.hash_fn)
            .field("num_owners", &self.num_owners)
            .field("num_segments", &self.num_segments)
            .field("factory", &self.factory)
            .finish()
    }
}
