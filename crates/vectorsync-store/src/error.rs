//! Error types for the store module.

use thiserror::Error;

use vectorsync_core::NodeId;

/// Errors that can occur while reading or extending a data log.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An append would leave a hole or duplicate a sequence number.
    #[error("non-contiguous append for producer {producer}: expected seq {expected}, got {got}")]
    NonContiguous { producer: NodeId, expected: u64, got: u64 },

    /// A record was appended to another producer's log.
    #[error("record from producer {got} appended to log of {expected}")]
    WrongProducer { expected: NodeId, got: NodeId },

    /// The requested range is not (fully) held locally.
    #[error("range {start}..={end} of producer {producer} unavailable (have {len})")]
    RangeUnavailable {
        producer: NodeId,
        start: u64,
        end: u64,
        len: u64,
    },

    /// The producer is not a member of the group.
    #[error("producer {producer} outside group of size {group_size}")]
    UnknownProducer { producer: NodeId, group_size: usize },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
