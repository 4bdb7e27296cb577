//! Strong type definitions for VectorSync.
//!
//! Identifiers are newtypes to prevent mixing a node index with a
//! sequence number at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a group member.
///
/// A node's id is its slot in every version vector of the group, so it is
/// always `< group_size`. Fixed when the node is constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a node id from its raw index.
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The slot this node occupies in a version vector.
    pub fn slot(self) -> usize {
        self.0 as usize
    }

    /// Iterate over every node id of a group of the given size.
    pub fn all(group_size: usize) -> impl Iterator<Item = NodeId> {
        (0..group_size as u64).map(NodeId)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

/// Opaque identifier of a synchronization group.
///
/// Never changes for a node's lifetime. Every inbound message carries one and
/// is rejected when it names a different group.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Create a group id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid for a running node).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
