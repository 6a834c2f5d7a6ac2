//! The immutable segment-to-owners assignment.

use crate::types::{Address, HashFunction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable assignment of hash-space segments to owning members.
///
/// Segments are numbered `0..num_segments`. Each segment has an ordered,
/// non-empty owner list drawn from `members`; the first owner is the
/// primary. `num_owners` is the replication target: a hash is *balanced*
/// when every segment has exactly `min(|members|, num_owners)` owners.
///
/// Values produced by a union merge are intentionally unbalanced (owner
/// lists may exceed `num_owners`) until a rebalance restores the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistentHash {
    hash_fn: HashFunction,
    num_owners: usize,
    members: Vec<Address>,
    segment_owners: Vec<Vec<Address>>,
}

impl ConsistentHash {
    pub(crate) fn new(
        hash_fn: HashFunction,
        num_owners: usize,
        members: Vec<Address>,
        segment_owners: Vec<Vec<Address>>,
    ) -> Self {
        debug_assert!(num_owners >= 1);
        debug_assert!(!members.is_empty());
        debug_assert!(segment_owners.iter().all(|owners| !owners.is_empty()));
        Self {
            hash_fn,
            num_owners,
            members,
            segment_owners,
        }
    }

    /// The hash function this assignment was built with.
    pub fn hash_fn(&self) -> HashFunction {
        self.hash_fn
    }

    /// The replication target per segment.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// The number of segments in the hash space.
    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    /// The members of this assignment, in topology order.
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Check whether an address is a member of this assignment.
    pub fn contains(&self, address: Address) -> bool {
        self.members.contains(&address)
    }

    /// The owners of a segment, primary first.
    ///
    /// # Panics
    ///
    /// Panics if `segment >= num_segments`.
    pub fn owners(&self, segment: usize) -> &[Address] {
        &self.segment_owners[segment]
    }

    /// The primary owner of a segment.
    pub fn primary_owner(&self, segment: usize) -> Address {
        self.segment_owners[segment][0]
    }

    /// All segments owned (primary or backup) by an address.
    pub fn segments_for_owner(&self, address: Address) -> Vec<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.contains(&address))
            .map(|(segment, _)| segment)
            .collect()
    }

    /// Check whether every segment has exactly `min(|members|, num_owners)`
    /// owners.
    ///
    /// This is the sole driver of "is more work needed" after a membership
    /// event or a rebalance completion.
    pub fn is_balanced(&self) -> bool {
        let target = self.num_owners.min(self.members.len());
        self.segment_owners
            .iter()
            .all(|owners| owners.len() == target)
    }

    pub(crate) fn segment_owners(&self) -> &[Vec<Address>] {
        &self.segment_owners
    }
}

impl fmt::Display for ConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CH{{{} members, {} segments, {} owners}}",
            self.members.len(),
            self.num_segments(),
            self.num_owners
        )
    }
}
