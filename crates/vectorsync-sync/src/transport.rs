//! Transport abstraction for the VectorSync protocol.
//!
//! The transport delivers messages between group members. Delivery is
//! best-effort: the protocol tolerates loss through fetch retries and later
//! sync rounds. Implementations may use a broadcast radio, UDP multicast, or
//! anything else that can reach the group.

use async_trait::async_trait;

use vectorsync_core::NodeId;

use crate::error::{Result, SyncError};
use crate::messages::Message;

/// Transport trait for sending and receiving protocol messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: NodeId, message: Message) -> Result<()>;

    /// Send a message to every other member of the group.
    async fn broadcast(&self, message: Message) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's id and the message.
    async fn recv(&self) -> Result<(NodeId, Message)>;

    /// Receive with timeout.
    ///
    /// Returns None if the timeout expires before a message arrives.
    async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<(NodeId, Message)>>;

    /// The local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// Currently reachable peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;
}

/// An in-process transport for tests and demos.
///
/// Messages travel as encoded [`Envelope`](crate::messages::Envelope) bytes,
/// so every hop exercises the wire codec.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio::sync::mpsc::error::TrySendError;
    use tokio::sync::{mpsc, Mutex, RwLock};
    use tracing::{debug, trace, warn};

    use crate::messages::Envelope;

    const CHANNEL_CAPACITY: usize = 1000;

    /// Shared state of an in-memory group.
    ///
    /// Each node's inbox is bounded. A delivery to a full inbox is dropped,
    /// like a frame lost on a busy medium, so a sender never waits on a peer.
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Vec<u8>>>>,
        loss: Option<(f64, Mutex<StdRng>)>,
        capacity: usize,
    }

    impl MemoryNetwork {
        /// A lossless network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// A network that drops each delivery with probability `rate`,
        /// reproducibly for a given `seed`.
        pub fn with_loss(rate: f64, seed: u64) -> Arc<Self> {
            Arc::new(Self {
                loss: Some((rate.clamp(0.0, 1.0), Mutex::new(StdRng::seed_from_u64(seed)))),
                ..Self::default()
            })
        }

        /// A lossless network whose inboxes hold at most `capacity` messages.
        pub fn with_capacity(capacity: usize) -> Arc<Self> {
            Arc::new(Self {
                capacity: capacity.max(1),
                ..Self::default()
            })
        }

        /// Attach a node and return its transport.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(self.capacity);
            self.senders.write().await.insert(node_id, tx);
            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Detach a node. Its transport stops receiving.
        pub async fn disconnect(&self, node_id: NodeId) {
            self.senders.write().await.remove(&node_id);
        }

        async fn dropped(&self) -> bool {
            match &self.loss {
                Some((rate, rng)) => rng.lock().await.gen_bool(*rate),
                None => false,
            }
        }

        async fn deliver(&self, to: NodeId, sender: &mpsc::Sender<Vec<u8>>, bytes: Vec<u8>) -> Result<()> {
            if self.dropped().await {
                trace!(to = %to, "delivery dropped");
                return Ok(());
            }
            match sender.try_send(bytes) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    debug!(to = %to, "inbox full, delivery dropped");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => {
                    Err(SyncError::Transport(format!("peer {} disconnected", to)))
                }
            }
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                senders: RwLock::new(HashMap::new()),
                loss: None,
                capacity: CHANNEL_CAPACITY,
            }
        }
    }

    /// One node's endpoint on a [`MemoryNetwork`].
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Vec<u8>>>,
    }

    impl MemoryTransport {
        fn encode(&self, message: Message) -> Result<Vec<u8>> {
            Envelope::new(self.node_id, message).to_bytes()
        }

        fn open(bytes: &[u8]) -> Result<(NodeId, Message)> {
            let envelope = Envelope::from_bytes(bytes)?;
            Ok((envelope.from, envelope.message))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: NodeId, message: Message) -> Result<()> {
            let bytes = self.encode(message)?;
            let senders = self.network.senders.read().await;
            match senders.get(&peer) {
                Some(sender) => self.network.deliver(peer, sender, bytes).await,
                None => Err(SyncError::Transport(format!("peer {} not found", peer))),
            }
        }

        async fn broadcast(&self, message: Message) -> Result<()> {
            let bytes = self.encode(message)?;
            let senders = self.network.senders.read().await;
            for (peer, sender) in senders.iter() {
                if *peer == self.node_id {
                    continue;
                }
                // A departed peer must not stop delivery to the rest.
                if let Err(err) = self.network.deliver(*peer, sender, bytes.clone()).await {
                    warn!(node = %self.node_id, error = %err, "broadcast delivery failed");
                }
            }
            Ok(())
        }

        async fn recv(&self) -> Result<(NodeId, Message)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(bytes) => Self::open(&bytes),
                None => Err(SyncError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(NodeId, Message)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(bytes)) => Self::open(&bytes).map(Some),
                Ok(None) => Err(SyncError::Transport("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let senders = self.network.senders.read().await;
            let mut peers: Vec<NodeId> = senders
                .keys()
                .filter(|id| **id != self.node_id)
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }
    }
}
