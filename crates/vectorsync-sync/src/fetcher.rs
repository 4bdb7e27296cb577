//! Recovery fetcher: pulls missing ranges and serves ranges to peers.
//!
//! At most one fetch is in flight per producer. Each fetch covers at most
//! `max_batch_size` records; longer gaps are closed by chained follow-up
//! fetches. Every in-flight entry remembers which sync senders' rounds depend
//! on it, so each sender's SyncACK goes out once its own round is done.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use vectorsync_core::{decode_batch, encode_batch, DataRecord, NodeId, SignedRecord};

use crate::error::{Result, SyncError};
use crate::messages::Message;
use crate::node::Node;
use crate::timer::{Timer, TimerId};

/// A fetch in flight for one producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFetch {
    /// First sequence of the outstanding request.
    pub start: u64,
    /// Last sequence of the outstanding request.
    pub end: u64,
    /// Last sequence the round needs; may exceed `end`.
    pub target_end: u64,
    /// Retransmissions of the outstanding request so far.
    pub retries: u32,
    /// Timeout of the outstanding request.
    pub timer: TimerId,
    /// Sync senders whose rounds wait on this producer.
    pub senders: BTreeSet<NodeId>,
}

/// Producers currently being recovered.
#[derive(Debug, Default, Clone)]
pub struct PendingFetchSet {
    entries: BTreeMap<NodeId, PendingFetch>,
}

impl PendingFetchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, producer: NodeId) -> Option<&PendingFetch> {
        self.entries.get(&producer)
    }

    pub(crate) fn get_mut(&mut self, producer: NodeId) -> Option<&mut PendingFetch> {
        self.entries.get_mut(&producer)
    }

    pub(crate) fn insert(&mut self, producer: NodeId, fetch: PendingFetch) {
        self.entries.insert(producer, fetch);
    }

    pub(crate) fn remove(&mut self, producer: NodeId) -> Option<PendingFetch> {
        self.entries.remove(&producer)
    }

    pub fn contains(&self, producer: NodeId) -> bool {
        self.entries.contains_key(&producer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Producers with a fetch in flight, ascending.
    pub fn producers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    /// Whether any in-flight fetch belongs to `sender`'s round.
    pub fn has_sender(&self, sender: NodeId) -> bool {
        self.entries.values().any(|f| f.senders.contains(&sender))
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingFetch> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

impl Node {
    /// Request `start..=target_end` of `producer` on behalf of `sender`'s round.
    ///
    /// Extends the in-flight fetch instead when one exists for the producer.
    pub(crate) fn send_fetch(&mut self, producer: NodeId, start: u64, target_end: u64, sender: NodeId) {
        if let Some(fetch) = self.pending.get_mut(producer) {
            fetch.senders.insert(sender);
            if target_end > fetch.target_end {
                fetch.target_end = target_end;
                trace!(node = %self.config.node_id, producer = %producer, target_end, "fetch extended");
            }
            return;
        }

        let end = self.batch_end(start, target_end);
        let timer = self.request_range(producer, start, end);
        self.pending.insert(
            producer,
            PendingFetch {
                start,
                end,
                target_end,
                retries: 0,
                timer,
                senders: BTreeSet::from([sender]),
            },
        );
        self.stats.fetches_sent += 1;
    }

    fn batch_end(&self, start: u64, target_end: u64) -> u64 {
        target_end.min(start + self.protocol().max_batch_size - 1)
    }

    fn request_range(&mut self, producer: NodeId, start: u64, end: u64) -> TimerId {
        self.effects.broadcast(Message::DataFetchRequest {
            group_id: self.group_id().clone(),
            requester_id: self.id(),
            producer_id: producer,
            start_seq: start,
            end_seq: end,
        });
        trace!(node = %self.id(), producer = %producer, start, end, "fetch request");
        let timeout = self.protocol().fetch_timeout_ms;
        self.schedule(timeout, Timer::FetchTimeout { producer })
    }

    /// Serve `start..=end` of `producer` to `requester`, or stay silent.
    pub(crate) fn on_fetch_request(
        &mut self,
        requester: NodeId,
        producer: NodeId,
        start: u64,
        end: u64,
    ) -> Result<()> {
        let node = self.id();
        if start == 0 || start > end {
            debug!(node = %node, producer = %producer, start, end, "fetch refused: bad range");
            return Ok(());
        }
        if end - start + 1 > self.protocol().max_batch_size {
            debug!(node = %node, producer = %producer, start, end, "fetch refused: range too wide");
            return Ok(());
        }
        // Both checks guard against a vector and log that disagree.
        if self.vv.get(producer) < end {
            debug!(node = %node, producer = %producer, end, "fetch refused: not in version vector");
            return Ok(());
        }
        if self.log.len(producer) < end {
            debug!(node = %node, producer = %producer, end, "fetch refused: not in data log");
            return Ok(());
        }

        let batch = encode_batch(self.log.range(producer, start, end)?);
        self.effects.send_to(
            requester,
            Message::DataFetchReply {
                group_id: self.group_id().clone(),
                producer_id: producer,
                start_seq: start,
                end_seq: end,
                batch: batch.into(),
            },
        );
        self.stats.fetch_replies_sent += 1;
        trace!(node = %node, requester = %requester, producer = %producer, start, end, "fetch reply");
        Ok(())
    }

    /// Apply a batch of `producer`'s records covering `start..=end`.
    pub(crate) fn on_fetch_reply(
        &mut self,
        producer: NodeId,
        start: u64,
        end: u64,
        batch: &[u8],
    ) -> Result<()> {
        let local = self.vv.get(producer);
        if local >= end {
            self.stats.stale_replies += 1;
            debug!(node = %self.id(), producer = %producer, local, end, "stale fetch reply");
            return Ok(());
        }
        if local + 1 < start {
            return Err(SyncError::DataGap {
                producer,
                local,
                start,
            });
        }

        let entries = decode_batch(batch).map_err(|e| SyncError::Decode(e.to_string()))?;
        let expected = end - start + 1;
        if entries.len() as u64 != expected {
            return Err(SyncError::Decode(format!(
                "batch for {}..={} holds {} records, expected {}",
                start,
                end,
                entries.len(),
                expected
            )));
        }

        let fresh: Vec<SignedRecord> = entries
            .into_iter()
            .zip(start..=end)
            .filter(|(_, seq)| *seq > local)
            .map(|(entry, seq)| {
                SignedRecord::new(
                    DataRecord::new(producer, seq, entry.content_type, entry.payload),
                    entry.signature,
                )
            })
            .collect();
        let applied = fresh.len() as u64;

        self.log.extend(producer, fresh)?;
        self.vv.advance(producer, end)?;
        self.windows.insert(producer, local + 1, end);
        self.stats.records_applied += applied;
        debug!(
            node = %self.id(),
            producer = %producer,
            applied,
            vv = %self.vv,
            "applied fetch reply"
        );

        self.notify_data_updated();
        self.advance_fetch(producer);
        Ok(())
    }

    /// Chain the next batch or close the producer's fetch once caught up.
    fn advance_fetch(&mut self, producer: NodeId) {
        let have = self.vv.get(producer);
        let (end, target_end, timer) = match self.pending.get(producer) {
            Some(fetch) => (fetch.end, fetch.target_end, fetch.timer),
            None => return,
        };
        if have < end {
            return;
        }
        self.cancel(timer);

        if have < target_end {
            let start = have + 1;
            let end = self.batch_end(start, target_end);
            let timer = self.request_range(producer, start, end);
            if let Some(fetch) = self.pending.get_mut(producer) {
                fetch.start = start;
                fetch.end = end;
                fetch.retries = 0;
                fetch.timer = timer;
            }
            self.stats.fetches_sent += 1;
        } else {
            self.resolve_fetch(producer);
        }
    }

    fn resolve_fetch(&mut self, producer: NodeId) {
        if let Some(fetch) = self.pending.remove(producer) {
            for sender in fetch.senders {
                if !self.pending.has_sender(sender) {
                    self.schedule_ack(sender);
                }
            }
        }
    }

    pub(crate) fn on_fetch_timeout(&mut self, id: TimerId, producer: NodeId) {
        let (start, end, retries) = match self.pending.get(producer) {
            Some(fetch) if fetch.timer == id => (fetch.start, fetch.end, fetch.retries),
            _ => return,
        };

        if retries < self.protocol().fetch_retries {
            let start = start.max(self.vv.get(producer) + 1);
            let timer = self.request_range(producer, start, end);
            if let Some(fetch) = self.pending.get_mut(producer) {
                fetch.start = start;
                fetch.retries += 1;
                fetch.timer = timer;
            }
            self.stats.fetch_retransmissions += 1;
            debug!(node = %self.id(), producer = %producer, start, end, retry = retries + 1, "fetch retransmitted");
        } else {
            let err = SyncError::FetchTimeout {
                producer,
                start,
                end,
            };
            self.stats.fetch_timeouts += 1;
            warn!(node = %self.id(), kind = err.kind(), error = %err, "giving up on fetch");
            self.resolve_fetch(producer);
        }
    }

    /// Drop every in-flight fetch without acknowledging anyone.
    pub(crate) fn abandon_fetches(&mut self) {
        for fetch in self.pending.drain() {
            self.cancel(fetch.timer);
        }
    }
}
