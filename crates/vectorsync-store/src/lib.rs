//! # VectorSync Store
//!
//! In-memory replica state for a VectorSync node: one append-only log per
//! group member, the receive windows observed for each of them, and
//! point-in-time snapshots used for offline availability analysis.
//!
//! ## Key Types
//!
//! - [`DataLog`] - Contiguous, per-producer record logs
//! - [`ReceiveWindow`] - Merged intervals of sequences confirmed received
//! - [`ReceiveWindows`] - One receive window per producer
//! - [`NodeSnapshot`] - A captured view of a node's replica
//!
//! ## Design Notes
//!
//! - **Append-only**: Logs are only extended, never rewritten or reordered
//! - **Contiguity**: Record `k` of producer `p` always has sequence `k + 1`
//! - **Authority**: The log length is authoritative; receive windows are
//!   diagnostics only

pub mod error;
pub mod log;
pub mod snapshot;
pub mod window;

pub use error::{Result, StoreError};
pub use log::DataLog;
pub use snapshot::NodeSnapshot;
pub use window::{ReceiveWindow, ReceiveWindows};
