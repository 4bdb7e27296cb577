//! Version vector: one contiguous-prefix counter per producer.
//!
//! Slot `i` holds the number of contiguous records a node has stored for
//! producer `i`, starting at sequence 1. The vector length equals the group
//! size and never changes.

use std::fmt;

use crate::canonical::{decode_version_vector, encode_version_vector};
use crate::error::{CoreError, Result};
use crate::types::NodeId;

/// Ordering of a peer's vector relative to the local one.
///
/// This is a two-valued comparison used only to decide whether a peer needs
/// data. Concurrent (incomparable) vectors report `GreaterOrEqual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOrdering {
    /// The peer is strictly behind: every slot `<=` and at least one `<`.
    Less,
    /// The peer is not strictly behind.
    GreaterOrEqual,
}

/// A fixed-length vector of per-producer sequence counters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct VersionVector {
    slots: Vec<u64>,
}

impl VersionVector {
    /// Create an all-zero vector for a group of `group_size` members.
    pub fn new(group_size: usize) -> Self {
        Self {
            slots: vec![0; group_size],
        }
    }

    /// Create a vector from raw slot values.
    pub fn from_slots(slots: Vec<u64>) -> Self {
        Self { slots }
    }

    /// Number of slots (the group size).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the vector has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The counter for `node`. Slots outside the group read as zero.
    pub fn get(&self, node: NodeId) -> u64 {
        self.slots.get(node.slot()).copied().unwrap_or(0)
    }

    /// Borrow the raw slots.
    pub fn as_slice(&self) -> &[u64] {
        &self.slots
    }

    /// Iterate over `(producer, seq)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, seq)| (NodeId(i as u64), *seq))
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.slots.iter().sum()
    }

    /// Increment the owning node's own slot, returning the new sequence.
    ///
    /// Only the owner ever calls this, once per locally published record.
    pub fn increment(&mut self, owner: NodeId) -> Result<u64> {
        let group_size = self.slots.len();
        let slot = self
            .slots
            .get_mut(owner.slot())
            .ok_or(CoreError::NodeOutOfRange {
                node: owner,
                group_size,
            })?;
        *slot += 1;
        Ok(*slot)
    }

    /// Raise the counter for `producer` to `seq`.
    ///
    /// Counters never decrease: a lower `seq` leaves the slot untouched.
    /// Returns whether the slot changed.
    pub fn advance(&mut self, producer: NodeId, seq: u64) -> Result<bool> {
        let group_size = self.slots.len();
        let slot = self
            .slots
            .get_mut(producer.slot())
            .ok_or(CoreError::NodeOutOfRange {
                node: producer,
                group_size,
            })?;
        if seq > *slot {
            *slot = seq;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Compare `other` against this vector.
    ///
    /// Returns [`VectorOrdering::Less`] iff every slot of `other` is `<=` the
    /// local slot and at least one is strictly less.
    pub fn compare(&self, other: &VersionVector) -> VectorOrdering {
        let mut strictly_less = false;
        for (i, mine) in self.slots.iter().enumerate() {
            let theirs = other.slots.get(i).copied().unwrap_or(0);
            if theirs > *mine {
                return VectorOrdering::GreaterOrEqual;
            }
            if theirs < *mine {
                strictly_less = true;
            }
        }
        if other.slots.len() > self.slots.len()
            && other.slots[self.slots.len()..].iter().any(|s| *s > 0)
        {
            return VectorOrdering::GreaterOrEqual;
        }
        if strictly_less {
            VectorOrdering::Less
        } else {
            VectorOrdering::GreaterOrEqual
        }
    }

    /// Producers for which `peer` holds newer data than this vector.
    ///
    /// Yields `(producer, local_seq, peer_seq)` with `peer_seq > local_seq`.
    pub fn behind<'a>(
        &'a self,
        peer: &'a VersionVector,
    ) -> impl Iterator<Item = (NodeId, u64, u64)> + 'a {
        self.slots
            .iter()
            .zip(peer.slots.iter())
            .enumerate()
            .filter(|(_, (mine, theirs))| theirs > mine)
            .map(|(i, (mine, theirs))| (NodeId(i as u64), *mine, *theirs))
    }

    /// Encode to canonical CBOR.
    pub fn encode(&self) -> Vec<u8> {
        encode_version_vector(&self.slots)
    }

    /// Decode from canonical CBOR, rejecting vectors of the wrong length.
    ///
    /// A length mismatch rejects the peer's message; it never resizes the
    /// local group.
    pub fn decode(bytes: &[u8], group_size: usize) -> Result<Self> {
        let slots = decode_version_vector(bytes)?;
        if slots.len() != group_size {
            return Err(CoreError::MalformedVector {
                expected: group_size,
                got: slots.len(),
            });
        }
        Ok(Self { slots })
    }
}

impl fmt::Debug for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionVector({})", self)
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, seq) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", i, seq)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_increment_owner_slot() {
        let mut vv = VersionVector::new(3);
        assert_eq!(vv.increment(NodeId(1)).unwrap(), 1);
        assert_eq!(vv.increment(NodeId(1)).unwrap(), 2);
        assert_eq!(vv.as_slice(), &[0, 2, 0]);
    }

    #[test]
    fn test_increment_out_of_range() {
        let mut vv = VersionVector::new(2);
        assert!(matches!(
            vv.increment(NodeId(5)),
            Err(CoreError::NodeOutOfRange { group_size: 2, .. })
        ));
    }

    #[test]
    fn test_advance_never_decreases() {
        let mut vv = VersionVector::from_slots(vec![4, 0]);
        assert!(!vv.advance(NodeId(0), 2).unwrap());
        assert_eq!(vv.get(NodeId(0)), 4);
        assert!(vv.advance(NodeId(0), 6).unwrap());
        assert_eq!(vv.get(NodeId(0)), 6);
    }

    #[test]
    fn test_compare_strictly_behind() {
        let local = VersionVector::from_slots(vec![3, 2]);
        let peer = VersionVector::from_slots(vec![1, 2]);
        assert_eq!(local.compare(&peer), VectorOrdering::Less);
    }

    #[test]
    fn test_compare_equal_is_not_behind() {
        let local = VersionVector::from_slots(vec![3, 2]);
        assert_eq!(local.compare(&local.clone()), VectorOrdering::GreaterOrEqual);
    }

    #[test]
    fn test_compare_concurrent_is_not_behind() {
        let local = VersionVector::from_slots(vec![3, 0]);
        let peer = VersionVector::from_slots(vec![0, 1]);
        assert_eq!(local.compare(&peer), VectorOrdering::GreaterOrEqual);
    }

    #[test]
    fn test_behind_lists_peer_ahead_slots() {
        let local = VersionVector::from_slots(vec![1, 5, 0]);
        let peer = VersionVector::from_slots(vec![3, 2, 1]);
        let gaps: Vec<_> = local.behind(&peer).collect();
        assert_eq!(gaps, vec![(NodeId(0), 1, 3), (NodeId(2), 0, 1)]);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let vv = VersionVector::from_slots(vec![1, 2, 3]);
        let bytes = vv.encode();
        assert!(matches!(
            VersionVector::decode(&bytes, 4),
            Err(CoreError::MalformedVector {
                expected: 4,
                got: 3
            })
        ));
        assert_eq!(VersionVector::decode(&bytes, 3).unwrap(), vv);
    }

    #[test]
    fn test_display() {
        let vv = VersionVector::from_slots(vec![3, 0]);
        assert_eq!(vv.to_string(), "[0:3,1:0]");
    }

    proptest! {
        #[test]
        fn test_compare_less_implies_behind_is_empty(
            slots in prop::collection::vec(0u64..100, 1..8),
            deltas in prop::collection::vec(0u64..5, 1..8),
        ) {
            let local = VersionVector::from_slots(slots.clone());
            let peer_slots: Vec<u64> = slots
                .iter()
                .zip(deltas.iter().chain(std::iter::repeat(&0)))
                .map(|(s, d)| s.saturating_sub(*d))
                .collect();
            let peer = VersionVector::from_slots(peer_slots);

            // A peer never ahead on any slot cannot make us fetch.
            prop_assert_eq!(local.behind(&peer).count(), 0);
            let expect_less = peer.as_slice() != local.as_slice();
            prop_assert_eq!(local.compare(&peer) == VectorOrdering::Less, expect_less);
        }
    }
}
