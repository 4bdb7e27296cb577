//! Sync engine: local publishing, vector advertisement and SyncACKs.
//!
//! Reconciliation is pull-based. A node advertises its version vector; each
//! peer that finds itself behind fetches the missing ranges and, once its
//! round for that sender is complete, broadcasts a SyncACK naming the sender.
//! A node never pushes unsolicited data.

use bytes::Bytes;
use tracing::{debug, error, trace};

use vectorsync_core::{CoreError, DataRecord, NodeId, VersionVector};

use crate::error::{Result, SyncError};
use crate::messages::Message;
use crate::node::Node;
use crate::state::NodeState;
use crate::timer::{Effects, Timer, TimerId};

impl Node {
    /// Append a record to this node's own log.
    ///
    /// Returns the new sequence number, or `None` when the node is not
    /// `Active`. Nothing is sent; peers learn of the record at the next sync.
    pub fn publish_local(&mut self, payload: impl Into<Bytes>, content_type: u32) -> Option<u64> {
        if !self.state.is(NodeState::Active) {
            debug!(node = %self.id(), state = %self.state(), "publish skipped");
            return None;
        }
        match self.append_local(payload.into(), content_type) {
            Ok(seq) => Some(seq),
            Err(err) => {
                error!(node = %self.id(), error = %err, "local append failed");
                None
            }
        }
    }

    fn append_local(&mut self, payload: Bytes, content_type: u32) -> Result<u64> {
        let me = self.id();
        let seq = self.vv.get(me) + 1;
        let record = self
            .signer
            .sign_record(DataRecord::new(me, seq, content_type, payload));
        self.log.append(record)?;
        self.vv.increment(me)?;
        self.windows.insert(me, seq, seq);
        self.stats.published += 1;
        trace!(node = %me, seq, content_type, "published");
        Ok(seq)
    }

    /// Broadcast this node's version vector to the group.
    pub fn initiate_sync(&mut self, now: i64) -> Effects {
        self.now = self.now.max(now);
        self.broadcast_sync();
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn broadcast_sync(&mut self) {
        if self.state.is(NodeState::Sleeping) {
            return;
        }
        let message = Message::SyncRequest {
            group_id: self.group_id().clone(),
            sender_id: self.id(),
            encoded_version_vector: self.vv.encode().into(),
        };
        self.effects.broadcast(message);
        self.stats.sync_requests_sent += 1;
        trace!(node = %self.id(), vv = %self.vv, "sync request");
    }

    pub(crate) fn on_sync_request(&mut self, sender: NodeId, encoded: &[u8]) -> Result<()> {
        let peer_vv = VersionVector::decode(encoded, self.group_size()).map_err(|e| match e {
            CoreError::MalformedVector { expected, got } => {
                SyncError::MalformedVector { expected, got }
            }
            CoreError::Decode(msg) => SyncError::Decode(msg),
            other => SyncError::Core(other),
        })?;
        self.stats.sync_requests_received += 1;
        self.last_sync_sender = Some(sender);

        let behind: Vec<(NodeId, u64, u64)> = self.vv.behind(&peer_vv).collect();
        trace!(
            node = %self.id(),
            sender = %sender,
            peer_vv = %peer_vv,
            gaps = behind.len(),
            "sync request"
        );
        for (producer, local, theirs) in behind {
            self.send_fetch(producer, local + 1, theirs, sender);
        }

        if !self.pending.has_sender(sender) {
            self.schedule_ack(sender);
        }
        Ok(())
    }

    /// Arm the jittered SyncACK for `target` unless one is already armed.
    pub(crate) fn schedule_ack(&mut self, target: NodeId) {
        if self.state.is(NodeState::Sleeping) || self.pending_acks.contains_key(&target) {
            return;
        }
        let delay = self.jitter(self.protocol().ack_jitter_ms);
        let id = self.schedule(delay, Timer::SendAck { target });
        self.pending_acks.insert(target, id);
    }

    pub(crate) fn on_ack_due(&mut self, id: TimerId, target: NodeId) {
        if self.pending_acks.get(&target) != Some(&id) {
            return;
        }
        self.pending_acks.remove(&target);
        if self.state.is(NodeState::Sleeping) {
            return;
        }
        self.effects.broadcast(Message::SyncAck {
            group_id: self.group_id().clone(),
            target_node_id: target,
        });
        self.stats.sync_acks_sent += 1;
        debug!(node = %self.id(), target = %target, "sync ack");
    }

    /// Drop our pending SyncACK for `target` after overhearing another one.
    pub(crate) fn suppress_ack(&mut self, target: NodeId) {
        if let Some(id) = self.pending_acks.remove(&target) {
            self.cancel(id);
            self.stats.sync_acks_suppressed += 1;
            trace!(node = %self.id(), target = %target, "sync ack suppressed");
        }
    }

    pub(crate) fn cancel_pending_acks(&mut self) {
        let ids: Vec<TimerId> = self.pending_acks.drain().map(|(_, id)| id).collect();
        for id in ids {
            self.cancel(id);
        }
    }

    pub(crate) fn on_periodic_sync(&mut self) {
        if let Some(interval) = self.protocol().sync_interval_ms {
            self.schedule(interval, Timer::PeriodicSync);
        }
        self.broadcast_sync();
    }
}
