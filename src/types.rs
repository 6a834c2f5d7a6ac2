//! Core types used throughout the topology engine.

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Identity of a cluster member.
///
/// Equality is total; ordering within a topology is the order of the
/// containing member list, never an intrinsic sort.
pub type Address = u64;

/// Version of a cache topology, strictly increasing per cache.
pub type TopologyId = i64;

/// Topology id of a cache before its first install.
pub const INITIAL_TOPOLOGY_ID: TopologyId = -1;

/// Identity of the hash function backing a cache's consistent hashes.
///
/// Two consistent hashes can only be merged if they were built with the
/// same hash function. The function itself is seeded xxHash64, matching
/// what the rest of the cluster uses for key routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashFunction {
    seed: u64,
}

impl HashFunction {
    /// Create a hash function identity with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Get the seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Hash a byte string.
    pub fn hash(&self, key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(key);
        hasher.finish()
    }
}

impl Default for HashFunction {
    fn default() -> Self {
        Self::with_seed(0)
    }
}
