//! # VectorSync Sync
//!
//! Gap-aware log synchronization for a small, fixed group of peers, with
//! cooperative duty-cycling layered on top.
//!
//! ## Overview
//!
//! Every member keeps an append-only log per producer and a version vector
//! whose slot `i` is the length of the contiguous prefix of producer `i`'s
//! log it holds. Members advertise their vectors; a member that sees it is
//! behind pulls the missing ranges. Members periodically probe the group and,
//! when enough are awake, the one that has slept least goes dormant for a
//! while after a final sync.
//!
//! The protocol core, [`Node`], performs no I/O. Each entry point takes the
//! current time and returns [`Effects`] (messages to send, timers to arm or
//! cancel) for a driver to carry out.
//!
//! ## Key Properties
//!
//! - **Pull-only**: a node never pushes data nobody asked for
//! - **Gap-aware**: records are applied only as a contiguous extension
//! - **Idempotent**: re-delivered replies change nothing
//! - **Fair**: sleep goes to the member with the least cumulative sleep
//!
//! ## Usage
//!
//! ```rust
//! use vectorsync_core::{content_type, Keypair, NodeId};
//! use vectorsync_sync::{Node, NodeConfig};
//!
//! let config = NodeConfig::new("field-team", NodeId(0), 3);
//! let mut node = Node::new(config, Keypair::generate()).unwrap();
//! let _timers = node.start(0);
//!
//! node.publish_local(&b"hello"[..], content_type::USER_DATA);
//! let effects = node.initiate_sync(10);
//! assert_eq!(effects.messages().count(), 1);
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- SyncRequest(vv) -------->|   B is behind on producer p
//!   |<------- DataFetchRequest(p) -----|
//!   |-------- DataFetchReply(p) ------>|   B applies the batch
//!   |<------- SyncAck(A) --------------|   broadcast, suppresses others
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod messages;
pub mod node;
pub mod sleep;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::{NodeConfig, ProtocolConfig};
pub use error::{Result, SyncError};
pub use fetcher::{PendingFetch, PendingFetchSet};
pub use messages::{limits, Envelope, Message, PROTOCOL_VERSION};
pub use node::{DataCallback, Node, NodeStats};
pub use sleep::{select_designee, ReplyTally};
pub use state::{NodeState, StateMachine};
pub use timer::{Action, Effects, Timer, TimerId, TimerQueue};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
