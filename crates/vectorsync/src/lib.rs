//! # VectorSync
//!
//! Gap-aware log synchronization for small groups of peers on an unreliable
//! broadcast network, with cooperative sleep scheduling.
//!
//! ## Overview
//!
//! - **Logs**: every member publishes to its own append-only log
//! - **Version vectors**: one contiguous-prefix counter per member
//! - **Recovery**: behind members pull exactly the ranges they miss
//! - **Duty-cycling**: members take turns sleeping while a quorum stays awake
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vectorsync::{NodeRunner, MemoryNetwork};
//! use vectorsync::core::{content_type, Keypair, NodeId};
//! use vectorsync::sync::NodeConfig;
//!
//! async fn example() -> vectorsync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId(0)).await;
//!
//!     let config = NodeConfig::new("field-team", NodeId(0), 3);
//!     let (handle, task) = NodeRunner::spawn(config, Keypair::generate(), transport.into())?;
//!
//!     handle.publish(&b"position fix"[..], content_type::GEO_DATA).await?;
//!     handle.sync().await?;
//!
//!     handle.shutdown().await?;
//!     let _node = task.await.expect("runner panicked")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `vectorsync::core` - Ids, version vectors, records, signing
//! - `vectorsync::store` - Data logs, receive windows, snapshots
//! - `vectorsync::sync` - The protocol node, messages and transport

pub mod error;
pub mod runner;

pub use vectorsync_core as core;
pub use vectorsync_store as store;
pub use vectorsync_sync as sync;

pub use error::{Result, VectorSyncError};
pub use runner::{init_tracing, NodeHandle, NodeRunner};

pub use vectorsync_sync::{
    MemoryNetwork, MemoryTransport, Node, NodeConfig, NodeState, NodeStats, ProtocolConfig,
    Transport,
};
