//! Error types for VectorSync core.

use thiserror::Error;

use crate::types::NodeId;

/// Core errors raised while handling vectors, records and their encodings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A decoded version vector does not match the local group size.
    #[error("malformed version vector: expected {expected} slots, got {got}")]
    MalformedVector { expected: usize, got: usize },

    /// A node id does not index into the group's version vector.
    #[error("node {node} is outside a group of size {group_size}")]
    NodeOutOfRange { node: NodeId, group_size: usize },

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("decoding error: {0}")]
    Decode(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
