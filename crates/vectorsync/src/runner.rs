//! Async driver for a [`Node`].
//!
//! A [`NodeRunner`] is one tokio task that owns a node and its transport. It
//! waits on three sources at once: inbound messages, host commands sent
//! through a [`NodeHandle`], and the earliest pending timer. Every event is
//! fed to the node and the resulting effects are carried out before the next
//! event is taken.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vectorsync_core::{Signer, VersionVector};
use vectorsync_sync::{
    Action, Effects, Node, NodeConfig, NodeState, NodeStats, SyncError, TimerQueue, Transport,
};

use crate::error::{Result, VectorSyncError};

const COMMAND_CAPACITY: usize = 64;

/// Requests from the host to the runner.
#[derive(Debug)]
enum Command {
    Publish {
        payload: Bytes,
        content_type: u32,
        reply: oneshot::Sender<Option<u64>>,
    },
    Sync,
    Wake,
    State(oneshot::Sender<NodeState>),
    Stats(oneshot::Sender<NodeStats>),
    VersionVector(oneshot::Sender<VersionVector>),
    Shutdown,
}

/// Cloneable host-side handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
}

impl NodeHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VectorSyncError::Shutdown)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| VectorSyncError::Shutdown)
    }

    /// Publish a record. Returns its sequence, or `None` if the node is not
    /// `Active`.
    pub async fn publish(&self, payload: impl Into<Bytes>, content_type: u32) -> Result<Option<u64>> {
        let payload = payload.into();
        self.ask(|reply| Command::Publish {
            payload,
            content_type,
            reply,
        })
        .await
    }

    /// Advertise the node's version vector now.
    pub async fn sync(&self) -> Result<()> {
        self.send(Command::Sync).await
    }

    /// Wake the node if it is sleeping.
    pub async fn wake(&self) -> Result<()> {
        self.send(Command::Wake).await
    }

    pub async fn state(&self) -> Result<NodeState> {
        self.ask(Command::State).await
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        self.ask(Command::Stats).await
    }

    pub async fn version_vector(&self) -> Result<VersionVector> {
        self.ask(Command::VersionVector).await
    }

    /// Stop the runner. The node is returned from its join handle.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

/// Owns a node and drives it from a transport and a clock.
pub struct NodeRunner<T: Transport> {
    node: Node,
    transport: Arc<T>,
    timers: TimerQueue,
    commands: mpsc::Receiver<Command>,
    epoch: Instant,
}

impl<T: Transport + 'static> NodeRunner<T> {
    /// Wrap an existing node.
    pub fn new(node: Node, transport: Arc<T>) -> Result<(Self, NodeHandle)> {
        if transport.local_node_id() != node.id() {
            return Err(VectorSyncError::InvalidConfig(format!(
                "transport bound to {} but node is {}",
                transport.local_node_id(),
                node.id()
            )));
        }
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let runner = Self {
            node,
            transport,
            timers: TimerQueue::new(),
            commands: rx,
            epoch: Instant::now(),
        };
        Ok((runner, NodeHandle { commands: tx }))
    }

    /// Build a node from `config` and run it on a new task.
    pub fn spawn(
        config: NodeConfig,
        signer: impl Signer + 'static,
        transport: Arc<T>,
    ) -> Result<(NodeHandle, JoinHandle<Result<Node>>)> {
        let node = Node::new(config, signer).map_err(|e| match e {
            SyncError::InvalidConfig(msg) => VectorSyncError::InvalidConfig(msg),
            other => VectorSyncError::Sync(other),
        })?;
        let (runner, handle) = Self::new(node, transport)?;
        Ok((handle, tokio::spawn(runner.run())))
    }

    /// Milliseconds since the runner was created.
    fn now(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    /// Run until shutdown or transport failure, then hand back the node.
    pub async fn run(mut self) -> Result<Node> {
        let now = self.now();
        let fx = self.node.start(now);
        self.apply(fx).await;
        info!(node = %self.node.id(), group = %self.node.group_id(), "runner started");

        loop {
            let wake_at = self
                .timers
                .next_deadline()
                .map(|ms| self.epoch + Duration::from_millis(u64::try_from(ms).unwrap_or(0)));
            let timer = async move {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                received = self.transport.recv() => match received {
                    Ok((from, message)) => {
                        let now = self.now();
                        // Rejected messages are already logged and counted by the node.
                        if let Ok(fx) = self.node.handle_message(from, message, now) {
                            self.apply(fx).await;
                        }
                    }
                    Err(SyncError::Transport(msg)) => {
                        warn!(node = %self.node.id(), error = %msg, "transport closed");
                        return Err(VectorSyncError::Transport(msg));
                    }
                    Err(err) => {
                        debug!(node = %self.node.id(), kind = err.kind(), error = %err, "undecodable message");
                    }
                },
                _ = timer => self.fire_due_timers().await,
            }
        }

        info!(node = %self.node.id(), "runner stopped");
        Ok(self.node)
    }

    async fn on_command(&mut self, command: Command) {
        let now = self.now();
        match command {
            Command::Publish {
                payload,
                content_type,
                reply,
            } => {
                let seq = self.node.publish_local(payload, content_type);
                let _ = reply.send(seq);
            }
            Command::Sync => {
                let fx = self.node.initiate_sync(now);
                self.apply(fx).await;
            }
            Command::Wake => {
                let fx = self.node.wake(now);
                self.apply(fx).await;
            }
            Command::State(reply) => {
                let _ = reply.send(self.node.state());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.node.stats().clone());
            }
            Command::VersionVector(reply) => {
                let _ = reply.send(self.node.version_vector().clone());
            }
            Command::Shutdown => {}
        }
    }

    async fn fire_due_timers(&mut self) {
        let now = self.now();
        while let Some((id, timer)) = self.timers.pop_due(now) {
            let fx = self.node.handle_timer(id, timer, now);
            self.apply(fx).await;
        }
    }

    /// Carry out a node's effects in order.
    async fn apply(&mut self, effects: Effects) {
        let now = self.now();
        for action in effects {
            match action {
                Action::Broadcast(message) => {
                    if let Err(err) = self.transport.broadcast(message).await {
                        warn!(node = %self.node.id(), error = %err, "broadcast failed");
                    }
                }
                Action::SendTo { peer, message } => {
                    if let Err(err) = self.transport.send(peer, message).await {
                        warn!(node = %self.node.id(), peer = %peer, error = %err, "send failed");
                    }
                }
                Action::Schedule {
                    id,
                    delay_ms,
                    timer,
                } => {
                    let delay = i64::try_from(delay_ms).unwrap_or(i64::MAX);
                    self.timers.schedule(id, now.saturating_add(delay), timer);
                }
                Action::Cancel(id) => {
                    self.timers.cancel(id);
                }
            }
        }
    }
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls do nothing.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
