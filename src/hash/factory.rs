//! Construction and transformation of consistent hashes.

use crate::error::HashError;
use crate::types::{Address, HashFunction};
use std::cmp::Reverse;
use std::fmt;

use super::consistent::ConsistentHash;

/// Provider of the consistent hash operations for a cache.
///
/// All operations are pure: they leave their inputs untouched and return
/// fresh [`ConsistentHash`] values. A cache picks its factory once at join
/// time and keeps it for its whole lifetime.
pub trait ConsistentHashFactory: Send + Sync + fmt::Debug {
    /// Build an initial balanced assignment over `members`.
    fn create(
        &self,
        hash_fn: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Address],
    ) -> Result<ConsistentHash, HashError>;

    /// Re-home the assignment onto `new_members`.
    ///
    /// Prior ownership is retained where possible: each segment keeps its
    /// surviving owners in order, and a segment left with no owners gets a
    /// deterministic fallback so it never goes ownerless. Members new to
    /// the hash own nothing until a subsequent [`rebalance`].
    ///
    /// [`rebalance`]: ConsistentHashFactory::rebalance
    fn update_members(
        &self,
        ch: &ConsistentHash,
        new_members: &[Address],
    ) -> Result<ConsistentHash, HashError>;

    /// Merge two assignments segment-wise so that no ownership is lost.
    ///
    /// The owner set of every segment in the result is a superset of the
    /// owner sets in both inputs. The result is intentionally unbalanced;
    /// a subsequent rebalance restores the replication target.
    fn union(
        &self,
        a: &ConsistentHash,
        b: &ConsistentHash,
    ) -> Result<ConsistentHash, HashError>;

    /// Produce a balanced assignment over the same members.
    ///
    /// Idempotent: rebalancing a balanced hash returns an equal value.
    fn rebalance(&self, ch: &ConsistentHash) -> ConsistentHash;
}

/// The default factory: rendezvous (highest-random-weight) candidate
/// ranking over `"{member}:{segment}"` keys.
///
/// Every member gets a deterministic per-segment weight, so owner
/// selection is stable across nodes without any coordination, and adding
/// or removing one member only disturbs the segments where that member
/// ranked highest.
#[derive(Debug, Clone, Copy, Default)]
pub struct RendezvousHashFactory;

impl RendezvousHashFactory {
    /// Rank `members` for a segment by descending rendezvous weight.
    ///
    /// Ties (which xxHash64 makes vanishingly rare) break on member list
    /// position so the ranking stays total and deterministic.
    fn ranked(hash_fn: HashFunction, members: &[Address], segment: usize) -> Vec<Address> {
        let mut weighted: Vec<(u64, usize)> = members
            .iter()
            .enumerate()
            .map(|(position, member)| {
                let key = format!("{}:{}", member, segment);
                (hash_fn.hash(key.as_bytes()), position)
            })
            .collect();
        weighted.sort_by_key(|&(weight, position)| (Reverse(weight), position));
        weighted
            .into_iter()
            .map(|(_, position)| members[position])
            .collect()
    }

    fn dedup_preserving_order(members: &[Address]) -> Vec<Address> {
        let mut unique = Vec::with_capacity(members.len());
        for &member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        unique
    }
}

impl ConsistentHashFactory for RendezvousHashFactory {
    fn create(
        &self,
        hash_fn: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Address],
    ) -> Result<ConsistentHash, HashError> {
        if num_owners < 1 || num_segments < 1 {
            return Err(HashError::InvalidParameters {
                num_owners,
                num_segments,
            });
        }
        let members = Self::dedup_preserving_order(members);
        if members.is_empty() {
            return Err(HashError::EmptyMembers);
        }

        let target = num_owners.min(members.len());
        let segment_owners = (0..num_segments)
            .map(|segment| {
                let mut owners = Self::ranked(hash_fn, &members, segment);
                owners.truncate(target);
                owners
            })
            .collect();

        Ok(ConsistentHash::new(hash_fn, num_owners, members, segment_owners))
    }

    fn update_members(
        &self,
        ch: &ConsistentHash,
        new_members: &[Address],
    ) -> Result<ConsistentHash, HashError> {
        let new_members = Self::dedup_preserving_order(new_members);
        if new_members.is_empty() {
            return Err(HashError::EmptyMembers);
        }

        let segment_owners = ch
            .segment_owners()
            .iter()
            .enumerate()
            .map(|(segment, owners)| {
                let surviving: Vec<Address> = owners
                    .iter()
                    .copied()
                    .filter(|owner| new_members.contains(owner))
                    .collect();
                if surviving.is_empty() {
                    // Every owner of this segment left; re-home it so no
                    // segment ever goes ownerless.
                    vec![Self::ranked(ch.hash_fn(), &new_members, segment)[0]]
                } else {
                    surviving
                }
            })
            .collect();

        Ok(ConsistentHash::new(
            ch.hash_fn(),
            ch.num_owners(),
            new_members,
            segment_owners,
        ))
    }

    fn union(
        &self,
        a: &ConsistentHash,
        b: &ConsistentHash,
    ) -> Result<ConsistentHash, HashError> {
        if a.num_segments() != b.num_segments() {
            return Err(HashError::SegmentCountMismatch {
                left: a.num_segments(),
                right: b.num_segments(),
            });
        }
        if a.num_owners() != b.num_owners() {
            return Err(HashError::OwnerCountMismatch {
                left: a.num_owners(),
                right: b.num_owners(),
            });
        }
        if a.hash_fn() != b.hash_fn() {
            return Err(HashError::HashFunctionMismatch);
        }

        let mut members = a.members().to_vec();
        for &member in b.members() {
            if !members.contains(&member) {
                members.push(member);
            }
        }

        let segment_owners = a
            .segment_owners()
            .iter()
            .zip(b.segment_owners())
            .map(|(left, right)| {
                let mut owners = left.clone();
                for &owner in right {
                    if !owners.contains(&owner) {
                        owners.push(owner);
                    }
                }
                owners
            })
            .collect();

        Ok(ConsistentHash::new(
            a.hash_fn(),
            a.num_owners(),
            members,
            segment_owners,
        ))
    }

    fn rebalance(&self, ch: &ConsistentHash) -> ConsistentHash {
        let target = ch.num_owners().min(ch.members().len());

        let segment_owners = ch
            .segment_owners()
            .iter()
            .enumerate()
            .map(|(segment, owners)| {
                let mut owners = owners.clone();
                if owners.len() > target {
                    owners.truncate(target);
                } else if owners.len() < target {
                    for candidate in Self::ranked(ch.hash_fn(), ch.members(), segment) {
                        if owners.len() == target {
                            break;
                        }
                        if !owners.contains(&candidate) {
                            owners.push(candidate);
                        }
                    }
                }
                owners
            })
            .collect();

        ConsistentHash::new(
            ch.hash_fn(),
            ch.num_owners(),
            ch.members().to_vec(),
            segment_owners,
        )
    }
}
