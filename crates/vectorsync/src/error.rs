//! Error types for the VectorSync runtime.

use thiserror::Error;
use vectorsync_core::CoreError;
use vectorsync_store::StoreError;
use vectorsync_sync::SyncError;

/// Errors surfaced to the host application.
#[derive(Debug, Error)]
pub enum VectorSyncError {
    /// Protocol error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Core primitive error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration rejected before the node started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport failed for good.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node's runner has stopped.
    #[error("node runner has shut down")]
    Shutdown,
}

/// Result type for VectorSync runtime operations.
pub type Result<T> = std::result::Result<T, VectorSyncError>;
