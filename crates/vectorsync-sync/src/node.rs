//! The VectorSync node: one group member's replica and protocol state.
//!
//! A [`Node`] is a synchronous state machine. Every entry point takes the
//! current time in milliseconds, runs to completion, and returns the
//! [`Effects`] a driver must carry out. The protocol handlers live in
//! [`crate::engine`], [`crate::fetcher`] and [`crate::sleep`]; this module
//! owns the state they share and routes events to them.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use vectorsync_core::{GroupId, NodeId, Signer, VersionVector};
use vectorsync_store::{DataLog, NodeSnapshot, ReceiveWindows};

use crate::config::{NodeConfig, ProtocolConfig};
use crate::error::{Result, SyncError};
use crate::fetcher::PendingFetchSet;
use crate::messages::Message;
use crate::sleep::SleepScheduler;
use crate::state::{NodeState, StateMachine};
use crate::timer::{Effects, Timer, TimerId};

/// Called with the updated vector after every applied fetch reply.
pub type DataCallback = Box<dyn FnMut(&VersionVector) + Send>;

/// Counters kept by a node for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub published: u64,
    pub sync_requests_sent: u64,
    pub sync_requests_received: u64,
    pub fetches_sent: u64,
    pub fetch_retransmissions: u64,
    pub fetch_timeouts: u64,
    pub fetch_replies_sent: u64,
    pub records_applied: u64,
    pub stale_replies: u64,
    pub data_gaps: u64,
    pub decode_failures: u64,
    pub messages_dropped: u64,
    pub ignored_while_sleeping: u64,
    pub sync_acks_sent: u64,
    pub sync_acks_suppressed: u64,
    pub probes_sent: u64,
    pub probe_replies_sent: u64,
    pub sleep_commands_sent: u64,
    pub sleeps: u64,
    pub wakes: u64,
}

/// One member of a synchronization group.
pub struct Node {
    pub(crate) config: NodeConfig,
    pub(crate) signer: Box<dyn Signer>,
    pub(crate) vv: VersionVector,
    pub(crate) log: DataLog,
    pub(crate) windows: ReceiveWindows,
    pub(crate) state: StateMachine,
    pub(crate) stats: NodeStats,
    pub(crate) now: i64,
    pub(crate) effects: Effects,
    pub(crate) last_sync_sender: Option<NodeId>,
    pub(crate) pending_acks: HashMap<NodeId, TimerId>,
    pub(crate) pending: PendingFetchSet,
    pub(crate) sleep: SleepScheduler,
    rng: StdRng,
    next_timer_id: u64,
    on_data: Option<DataCallback>,
    snapshots: Vec<NodeSnapshot>,
    started: bool,
}

impl Node {
    /// Create a node after validating its configuration.
    pub fn new(config: NodeConfig, signer: impl Signer + 'static) -> Result<Self> {
        config.validate()?;
        let group_size = config.group_size;
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Ok(Self {
            vv: VersionVector::new(group_size),
            log: DataLog::new(group_size),
            windows: ReceiveWindows::new(group_size),
            state: StateMachine::new(),
            stats: NodeStats::default(),
            now: 0,
            effects: Effects::new(),
            last_sync_sender: None,
            pending_acks: HashMap::new(),
            pending: PendingFetchSet::new(),
            sleep: SleepScheduler::default(),
            signer: Box::new(signer),
            rng,
            next_timer_id: 0,
            on_data: None,
            snapshots: Vec::new(),
            started: false,
            config,
        })
    }

    /// Register the data-updated callback.
    pub fn with_data_callback(mut self, callback: impl FnMut(&VersionVector) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(callback));
        self
    }

    /// Replace the data-updated callback.
    pub fn set_data_callback(&mut self, callback: impl FnMut(&VersionVector) + Send + 'static) {
        self.on_data = Some(Box::new(callback));
    }

    // ────────────────────────────────────────────────────────────────────────
    // Accessors
    // ────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.config.group_id
    }

    pub fn group_size(&self) -> usize {
        self.config.group_size
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn protocol(&self) -> &ProtocolConfig {
        &self.config.protocol
    }

    pub fn state(&self) -> NodeState {
        self.state.current()
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.vv
    }

    pub fn log(&self) -> &DataLog {
        &self.log
    }

    pub fn receive_windows(&self) -> &ReceiveWindows {
        &self.windows
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Latest time seen by the node.
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Sender of the most recent sync request (diagnostic only).
    pub fn last_sync_sender(&self) -> Option<NodeId> {
        self.last_sync_sender
    }

    /// Producers with a fetch in flight.
    pub fn pending_fetches(&self) -> &PendingFetchSet {
        &self.pending
    }

    /// Total dormant time already credited to this node.
    pub fn cumulative_sleep_ms(&self) -> u64 {
        self.sleep.cumulative_sleep_ms
    }

    /// When the current (or last uncredited) dormant period began.
    pub fn sleep_start(&self) -> Option<i64> {
        self.sleep.sleep_start
    }

    /// When the node last woke, until the dormant time is credited.
    pub fn woke_at(&self) -> Option<i64> {
        self.sleep.woke_at
    }

    /// How many times this node has been designated to sleep.
    pub fn times_designated(&self) -> u64 {
        self.sleep.times_designated
    }

    /// Snapshots captured on the snapshot interval.
    pub fn snapshots(&self) -> &[NodeSnapshot] {
        &self.snapshots
    }

    /// Capture a snapshot of the replica now.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::capture(
            self.now,
            !self.state.is(NodeState::Sleeping),
            self.stats.published,
            &self.vv,
            &self.windows,
        )
    }

    // ────────────────────────────────────────────────────────────────────────
    // Entry points
    // ────────────────────────────────────────────────────────────────────────

    /// Arm the periodic timers. Calling it again has no effect.
    pub fn start(&mut self, now: i64) -> Effects {
        self.enter(now);
        if !self.started {
            self.started = true;
            let protocol = self.protocol().clone();
            if protocol.duty_cycling {
                // Randomized first round keeps members from probing in lockstep.
                let first = self.rng.gen_range(1..=protocol.probe_interval_ms);
                self.schedule(first, Timer::ProbeCycle);
            }
            if let Some(interval) = protocol.sync_interval_ms {
                self.schedule(interval, Timer::PeriodicSync);
            }
            if let Some(interval) = protocol.snapshot_interval_ms {
                self.schedule(interval, Timer::Snapshot);
            }
            debug!(node = %self.id(), group = %self.group_id(), "node started");
        }
        self.take_effects()
    }

    /// Process one inbound message.
    ///
    /// Invalid or unusable messages are dropped: the error is logged,
    /// counted in [`NodeStats`], and returned for inspection.
    pub fn handle_message(&mut self, from: NodeId, message: Message, now: i64) -> Result<Effects> {
        self.enter(now);
        match self.dispatch(from, message) {
            Ok(()) => Ok(self.take_effects()),
            Err(err) => {
                self.record_error(&err);
                self.effects = Effects::new();
                Err(err)
            }
        }
    }

    /// Process an expired timer.
    pub fn handle_timer(&mut self, id: TimerId, timer: Timer, now: i64) -> Effects {
        self.enter(now);
        trace!(node = %self.id(), ?id, ?timer, "timer fired");
        let result = match timer {
            Timer::ProbeCycle => self.on_probe_cycle(),
            Timer::ProbeWindowClose { round } => self.on_probe_window_close(id, round),
            Timer::ProbeReply { prober } => {
                self.on_probe_reply_due(id, prober);
                Ok(())
            }
            Timer::FinalSync => self.on_final_sync_tick(id),
            Timer::WakeUp => self.on_wake_timer(id),
            Timer::WakeSettle => self.on_wake_settle(id),
            Timer::FetchTimeout { producer } => {
                self.on_fetch_timeout(id, producer);
                Ok(())
            }
            Timer::SendAck { target } => {
                self.on_ack_due(id, target);
                Ok(())
            }
            Timer::PeriodicSync => {
                self.on_periodic_sync();
                Ok(())
            }
            Timer::Snapshot => {
                self.on_snapshot_due();
                Ok(())
            }
        };
        if let Err(err) = result {
            self.record_error(&err);
        }
        self.take_effects()
    }

    fn dispatch(&mut self, from: NodeId, message: Message) -> Result<()> {
        if message.group_id() != self.group_id() {
            return Err(SyncError::GroupMismatch {
                expected: self.group_id().clone(),
                got: message.group_id().clone(),
            });
        }
        message.validate(self.group_size())?;

        if from == self.id() {
            return Ok(());
        }
        if self.state.is(NodeState::Sleeping) {
            trace!(node = %self.id(), kind = message.kind(), "ignored while sleeping");
            self.stats.ignored_while_sleeping += 1;
            return Ok(());
        }
        trace!(node = %self.id(), from = %from, kind = message.kind(), "recv");

        match message {
            Message::SyncRequest {
                sender_id,
                encoded_version_vector,
                ..
            } => self.on_sync_request(sender_id, &encoded_version_vector),
            Message::DataFetchRequest {
                requester_id,
                producer_id,
                start_seq,
                end_seq,
                ..
            } => self.on_fetch_request(requester_id, producer_id, start_seq, end_seq),
            Message::DataFetchReply {
                producer_id,
                start_seq,
                end_seq,
                batch,
                ..
            } => self.on_fetch_reply(producer_id, start_seq, end_seq, &batch),
            Message::ProbeRequest { prober_id, .. } => {
                self.on_probe(prober_id);
                Ok(())
            }
            Message::ProbeReply {
                node_id,
                cumulative_sleep_ms,
                ..
            } => {
                self.on_probe_reply(node_id, cumulative_sleep_ms);
                Ok(())
            }
            Message::SleepCommand { target_node_id, .. } => self.on_sleep_command(target_node_id),
            Message::SyncAck { target_node_id, .. } => self.on_sync_ack(target_node_id),
        }
    }

    fn on_snapshot_due(&mut self) {
        if let Some(interval) = self.protocol().snapshot_interval_ms {
            self.schedule(interval, Timer::Snapshot);
        }
        let snapshot = self.snapshot();
        trace!(node = %self.id(), %snapshot, "snapshot");
        self.snapshots.push(snapshot);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Shared helpers
    // ────────────────────────────────────────────────────────────────────────

    pub(crate) fn enter(&mut self, now: i64) {
        self.now = self.now.max(now);
    }

    pub(crate) fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    /// Arm a timer and return its handle.
    pub(crate) fn schedule(&mut self, delay_ms: u64, timer: Timer) -> TimerId {
        self.next_timer_id += 1;
        let id = TimerId(self.next_timer_id);
        self.effects.schedule(id, delay_ms, timer);
        id
    }

    pub(crate) fn cancel(&mut self, id: TimerId) {
        self.effects.cancel(id);
    }

    /// Uniform random delay in `[0, max_ms]`.
    pub(crate) fn jitter(&mut self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=max_ms)
        }
    }

    pub(crate) fn transition(&mut self, to: NodeState) -> Result<()> {
        let from = self.state.transition(to)?;
        debug!(node = %self.id(), %from, %to, at = self.now, "state transition");
        Ok(())
    }

    pub(crate) fn notify_data_updated(&mut self) {
        if let Some(callback) = self.on_data.as_mut() {
            callback(&self.vv);
        }
    }

    fn record_error(&mut self, err: &SyncError) {
        let node = self.id();
        match err {
            SyncError::DataGap { .. } => {
                self.stats.data_gaps += 1;
                error!(node = %node, kind = err.kind(), error = %err, "data gap");
            }
            SyncError::Decode(_) => {
                self.stats.decode_failures += 1;
                warn!(node = %node, kind = err.kind(), error = %err, "dropping undecodable message");
            }
            SyncError::MalformedVector { .. }
            | SyncError::GroupMismatch { .. }
            | SyncError::InvalidName(_) => {
                self.stats.messages_dropped += 1;
                warn!(node = %node, kind = err.kind(), error = %err, "dropping message");
            }
            SyncError::IllegalTransition { .. } | SyncError::Store(_) | SyncError::Core(_) => {
                error!(node = %node, kind = err.kind(), error = %err, "protocol invariant violated");
            }
            _ => {
                warn!(node = %node, kind = err.kind(), error = %err, "protocol error");
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("group", &self.config.group_id)
            .field("node", &self.config.node_id)
            .field("state", &self.state.current())
            .field("vv", &self.vv)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
