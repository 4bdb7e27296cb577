//! Error types for the sync module.

use thiserror::Error;

use vectorsync_core::{GroupId, NodeId};

use crate::state::NodeState;

/// Errors that can occur while running the VectorSync protocol.
///
/// None of these is fatal to a node: the offending message is dropped and
/// the error is logged and counted.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A peer's version vector does not match the local group size.
    #[error("malformed version vector: expected {expected} slots, got {got}")]
    MalformedVector { expected: usize, got: usize },

    /// The message names a different synchronization group.
    #[error("group mismatch: local={expected}, message={got}")]
    GroupMismatch { expected: GroupId, got: GroupId },

    /// The message is missing or carries an out-of-range field.
    #[error("invalid message name: {0}")]
    InvalidName(String),

    /// A fetch reply starts beyond the local contiguous prefix.
    #[error("data gap for producer {producer}: have {local}, reply starts at {start}")]
    DataGap { producer: NodeId, local: u64, start: u64 },

    /// A fetch was not answered within the retry budget.
    #[error("fetch of producer {producer} range {start}..={end} timed out")]
    FetchTimeout { producer: NodeId, start: u64, end: u64 },

    /// Message or batch decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The state machine refused a transition.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: NodeState, to: NodeState },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Node or protocol configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Log operation failed.
    #[error("store error: {0}")]
    Store(#[from] vectorsync_store::StoreError),

    /// Core primitive failed.
    #[error("core error: {0}")]
    Core(#[from] vectorsync_core::CoreError),
}

impl SyncError {
    /// Short stable name used as the `kind` field in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::MalformedVector { .. } => "malformed_vector",
            SyncError::GroupMismatch { .. } => "group_mismatch",
            SyncError::InvalidName(_) => "invalid_name",
            SyncError::DataGap { .. } => "data_gap",
            SyncError::FetchTimeout { .. } => "fetch_timeout",
            SyncError::Decode(_) => "decode",
            SyncError::IllegalTransition { .. } => "illegal_transition",
            SyncError::Transport(_) => "transport",
            SyncError::InvalidConfig(_) => "invalid_config",
            SyncError::Store(_) => "store",
            SyncError::Core(_) => "core",
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
