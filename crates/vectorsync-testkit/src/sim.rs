//! Deterministic discrete-event simulation of a VectorSync group.
//!
//! Time is virtual. Every message goes through the wire codec, waits out a
//! configurable link delay, and may be lost (seeded) or blocked by a
//! partition. Each node keeps its own [`TimerQueue`]; the simulation always
//! runs whichever event, message or timer, is due first. Two runs with the
//! same seed and inputs produce the same trace.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::trace;

use vectorsync_core::{content_type, NodeId, VersionVector};
use vectorsync_store::NodeSnapshot;
use vectorsync_sync::{
    Action, Effects, Envelope, Message, Node, NodeConfig, NodeState, ProtocolConfig, SyncError,
    TimerQueue,
};

use crate::fixtures::{keypair_for, GROUP};

/// Link behaviour of a simulated network.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Base one-way delay.
    pub link_delay_ms: u64,
    /// Extra uniform delay in `[0, link_jitter_ms]`.
    pub link_jitter_ms: u64,
    /// Probability that a single delivery is lost.
    pub loss_rate: f64,
    /// Seed for loss, delay jitter and node jitter.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            link_delay_ms: 5,
            link_jitter_ms: 5,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub partitioned: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct Delivery {
    to: NodeId,
    bytes: Vec<u8>,
}

struct SimNode {
    node: Node,
    timers: TimerQueue,
}

/// A simulated group.
pub struct Simulation {
    now: i64,
    nodes: Vec<SimNode>,
    in_flight: BTreeMap<(i64, u64), Delivery>,
    next_seq: u64,
    blocked: BTreeSet<(NodeId, NodeId)>,
    rng: StdRng,
    config: SimConfig,
    stats: SimStats,
}

impl Simulation {
    /// A group of `group_size` fresh nodes sharing `protocol`.
    pub fn new(group_size: usize, protocol: ProtocolConfig, config: SimConfig) -> Result<Self, SyncError> {
        let nodes = (0..group_size as u64)
            .map(|id| {
                let node_config = NodeConfig::new(GROUP, NodeId(id), group_size)
                    .with_protocol(protocol.clone())
                    .with_seed(config.seed.wrapping_mul(1_000_003).wrapping_add(id));
                Node::new(node_config, keypair_for(id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_nodes(nodes, config))
    }

    /// Simulate prebuilt nodes. Node `i` must have id `i`.
    pub fn with_nodes(nodes: Vec<Node>, config: SimConfig) -> Self {
        Self {
            now: 0,
            nodes: nodes
                .into_iter()
                .map(|node| SimNode {
                    node,
                    timers: TimerQueue::new(),
                })
                .collect(),
            in_flight: BTreeMap::new(),
            next_seq: 0,
            blocked: BTreeSet::new(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            stats: SimStats::default(),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Inspection
    // ────────────────────────────────────────────────────────────────────────

    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: u64) -> &Node {
        &self.nodes[id as usize].node
    }

    pub fn node_mut(&mut self, id: u64) -> &mut Node {
        &mut self.nodes[id as usize].node
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|n| &n.node)
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Version vectors of all nodes, by id.
    pub fn vectors(&self) -> Vec<VersionVector> {
        self.nodes().map(|n| n.version_vector().clone()).collect()
    }

    /// Whether every node holds the same vector.
    pub fn converged(&self) -> bool {
        let mut vectors = self.nodes().map(|n| n.version_vector());
        match vectors.next() {
            Some(first) => vectors.all(|v| v == first),
            None => true,
        }
    }

    /// Whether every node holds `expected`.
    pub fn all_hold(&self, expected: &[u64]) -> bool {
        self.nodes().all(|n| n.version_vector().as_slice() == expected)
    }

    pub fn states(&self) -> Vec<NodeState> {
        self.nodes().map(|n| n.state()).collect()
    }

    /// Every captured snapshot, by node, as JSON.
    pub fn snapshots_json(&self) -> serde_json::Result<String> {
        let all: Vec<(NodeId, &[NodeSnapshot])> =
            self.nodes().map(|n| (n.id(), n.snapshots())).collect();
        serde_json::to_string(&all)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Host actions
    // ────────────────────────────────────────────────────────────────────────

    /// Arm every node's periodic timers.
    pub fn start(&mut self) {
        for i in 0..self.nodes.len() {
            let fx = self.nodes[i].node.start(self.now);
            self.apply(i, fx);
        }
    }

    pub fn publish(&mut self, id: u64, payload: &[u8]) -> Option<u64> {
        self.publish_typed(id, content_type::USER_DATA, payload)
    }

    pub fn publish_typed(&mut self, id: u64, content_type: u32, payload: &[u8]) -> Option<u64> {
        self.node_mut(id).publish_local(payload.to_vec(), content_type)
    }

    pub fn sync(&mut self, id: u64) {
        let now = self.now;
        let fx = self.node_mut(id).initiate_sync(now);
        self.apply(id as usize, fx);
    }

    pub fn wake(&mut self, id: u64) {
        let now = self.now;
        let fx = self.node_mut(id).wake(now);
        self.apply(id as usize, fx);
    }

    /// Inject a message to `to` as if sent by `from`, bypassing the network.
    pub fn inject(&mut self, from: u64, to: u64, message: Message) -> Result<(), SyncError> {
        let now = self.now;
        let fx = self.node_mut(to).handle_message(NodeId(from), message, now)?;
        self.apply(to as usize, fx);
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Network faults
    // ────────────────────────────────────────────────────────────────────────

    /// Block traffic between `a` and `b` in both directions.
    pub fn partition(&mut self, a: u64, b: u64) {
        self.blocked.insert((NodeId(a), NodeId(b)));
        self.blocked.insert((NodeId(b), NodeId(a)));
    }

    /// Block all traffic to and from `id`.
    pub fn isolate(&mut self, id: u64) {
        for other in 0..self.nodes.len() as u64 {
            if other != id {
                self.partition(id, other);
            }
        }
    }

    pub fn heal(&mut self, a: u64, b: u64) {
        self.blocked.remove(&(NodeId(a), NodeId(b)));
        self.blocked.remove(&(NodeId(b), NodeId(a)));
    }

    pub fn heal_all(&mut self) {
        self.blocked.clear();
    }

    pub fn set_loss_rate(&mut self, rate: f64) {
        self.config.loss_rate = rate.clamp(0.0, 1.0);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Running
    // ────────────────────────────────────────────────────────────────────────

    /// Run the next due event. Returns false when nothing is pending.
    pub fn step(&mut self) -> bool {
        let next_message = self.in_flight.keys().next().copied();
        let next_timer = self.next_timer();

        match (next_message, next_timer) {
            (None, None) => false,
            (Some(key), Some((at, _))) if key.0 <= at => {
                self.deliver(key);
                true
            }
            (Some(key), None) => {
                self.deliver(key);
                true
            }
            (_, Some((at, index))) => {
                self.fire_timer(index, at);
                true
            }
        }
    }

    /// Run every event due at or before `deadline`, then advance the clock
    /// to it.
    pub fn run_until(&mut self, deadline: i64) {
        while self.next_event_at().map_or(false, |at| at <= deadline) {
            self.step();
        }
        self.now = self.now.max(deadline);
    }

    pub fn run_for(&mut self, duration_ms: u64) {
        let deadline = self.now.saturating_add(i64::try_from(duration_ms).unwrap_or(i64::MAX));
        self.run_until(deadline);
    }

    /// Run until `done` holds, checking after every event, or until
    /// `deadline`. Returns whether `done` held.
    pub fn run_until_with(&mut self, deadline: i64, mut done: impl FnMut(&Simulation) -> bool) -> bool {
        loop {
            if done(self) {
                return true;
            }
            match self.next_event_at() {
                Some(at) if at <= deadline => {
                    self.step();
                }
                _ => {
                    self.now = self.now.max(deadline);
                    return done(self);
                }
            }
        }
    }

    fn next_event_at(&mut self) -> Option<i64> {
        let message = self.in_flight.keys().next().map(|(at, _)| *at);
        let timer = self.next_timer().map(|(at, _)| at);
        match (message, timer) {
            (Some(m), Some(t)) => Some(m.min(t)),
            (m, t) => m.or(t),
        }
    }

    /// Earliest timer across all nodes, lowest id on ties.
    fn next_timer(&mut self) -> Option<(i64, usize)> {
        self.nodes
            .iter_mut()
            .enumerate()
            .filter_map(|(i, n)| n.timers.next_deadline().map(|at| (at, i)))
            .min()
    }

    fn fire_timer(&mut self, index: usize, at: i64) {
        self.now = self.now.max(at);
        let now = self.now;
        let sim_node = &mut self.nodes[index];
        if let Some((id, timer)) = sim_node.timers.pop_due(now) {
            let fx = sim_node.node.handle_timer(id, timer, now);
            self.apply(index, fx);
        }
    }

    fn deliver(&mut self, key: (i64, u64)) {
        let delivery = match self.in_flight.remove(&key) {
            Some(delivery) => delivery,
            None => return,
        };
        self.now = self.now.max(key.0);
        let now = self.now;

        let envelope = match Envelope::from_bytes(&delivery.bytes) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.stats.rejected += 1;
                return;
            }
        };
        self.stats.delivered += 1;
        let index = delivery.to.slot();
        match self.nodes[index]
            .node
            .handle_message(envelope.from, envelope.message, now)
        {
            Ok(fx) => self.apply(index, fx),
            Err(_) => self.stats.rejected += 1,
        }
    }

    fn apply(&mut self, index: usize, effects: Effects) {
        let from = self.nodes[index].node.id();
        for action in effects {
            match action {
                Action::Broadcast(message) => {
                    for to in 0..self.nodes.len() as u64 {
                        if NodeId(to) != from {
                            self.send(from, NodeId(to), &message);
                        }
                    }
                }
                Action::SendTo { peer, message } => self.send(from, peer, &message),
                Action::Schedule {
                    id,
                    delay_ms,
                    timer,
                } => {
                    let at = self.now.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));
                    self.nodes[index].timers.schedule(id, at, timer);
                }
                Action::Cancel(id) => {
                    self.nodes[index].timers.cancel(id);
                }
            }
        }
    }

    fn send(&mut self, from: NodeId, to: NodeId, message: &Message) {
        self.stats.sent += 1;
        if to.slot() >= self.nodes.len() {
            self.stats.rejected += 1;
            return;
        }
        if self.blocked.contains(&(from, to)) {
            self.stats.partitioned += 1;
            return;
        }
        if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate) {
            self.stats.lost += 1;
            trace!(from = %from, to = %to, kind = message.kind(), "lost");
            return;
        }
        let bytes = match Envelope::new(from, message.clone()).to_bytes() {
            Ok(bytes) => bytes,
            Err(_) => {
                self.stats.rejected += 1;
                return;
            }
        };
        let jitter = if self.config.link_jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.config.link_jitter_ms)
        };
        let delay = self.config.link_delay_ms + jitter;
        let at = self.now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX));
        self.next_seq += 1;
        self.in_flight.insert((at, self.next_seq), Delivery { to, bytes });
    }
}
