//! Error types for the topology engine.

use crate::types::TopologyId;
use thiserror::Error;

/// Result type alias for topology engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the topology engine.
#[derive(Error, Debug)]
pub enum Error {
    /// A cluster-wide rebalance confirmation that does not match the
    /// outstanding rebalance. The topology is left untouched.
    #[error("stale rebalance confirmation for cache {cache}: received topology id {received}, expected {expected}")]
    StaleRebalanceConfirmation {
        cache: String,
        received: TopologyId,
        expected: TopologyId,
    },

    /// The named cache has not been initialized with this policy.
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    /// Consistent hash construction errors.
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
}

/// Errors from consistent hash operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// A consistent hash needs at least one member.
    #[error("cannot build a consistent hash without members")]
    EmptyMembers,

    /// Union of hashes with different segment counts.
    #[error("segment count mismatch: {left} vs {right}")]
    SegmentCountMismatch { left: usize, right: usize },

    /// Union of hashes with different owner counts.
    #[error("owner count mismatch: {left} vs {right}")]
    OwnerCountMismatch { left: usize, right: usize },

    /// Union of hashes built with different hash functions.
    #[error("hash function mismatch")]
    HashFunctionMismatch,

    /// A cache must carve the hash space into at least one segment and
    /// replicate to at least one owner.
    #[error("invalid cache parameters: num_owners={num_owners}, num_segments={num_segments}")]
    InvalidParameters {
        num_owners: usize,
        num_segments: usize,
    },
}
