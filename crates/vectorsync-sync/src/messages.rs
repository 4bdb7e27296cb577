//! VectorSync wire messages.
//!
//! Every message names its group. Messages travel inside a versioned
//! [`Envelope`] encoded as CBOR.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use vectorsync_core::{GroupId, NodeId};

use crate::error::{Result, SyncError};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max encoded envelope size in bytes.
    pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;
    /// Max group id length in bytes.
    pub const MAX_GROUP_ID_LEN: usize = 256;
    /// Max encoded version vector size in bytes.
    pub const MAX_VECTOR_BYTES: usize = 64 * 1024;
    /// Max records a single fetch may cover.
    pub const MAX_FETCH_RANGE: u64 = 1000;
}

/// Protocol messages exchanged within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Advertise the sender's version vector.
    SyncRequest {
        group_id: GroupId,
        sender_id: NodeId,
        /// Canonical CBOR array of the sender's counters.
        encoded_version_vector: Bytes,
    },

    /// Ask for records `start_seq..=end_seq` of one producer.
    DataFetchRequest {
        group_id: GroupId,
        requester_id: NodeId,
        producer_id: NodeId,
        start_seq: u64,
        end_seq: u64,
    },

    /// Records `start_seq..=end_seq` of one producer.
    DataFetchReply {
        group_id: GroupId,
        producer_id: NodeId,
        start_seq: u64,
        end_seq: u64,
        /// Encoded list of `(content_type, payload, signature)`.
        batch: Bytes,
    },

    /// Ask which peers are active.
    ProbeRequest { group_id: GroupId, prober_id: NodeId },

    /// An active peer's answer to a probe.
    ProbeReply {
        group_id: GroupId,
        node_id: NodeId,
        cumulative_sleep_ms: u64,
    },

    /// Tell the target it has been designated to sleep.
    SleepCommand {
        group_id: GroupId,
        target_node_id: NodeId,
    },

    /// The target's sync round has been fully pulled by the sender.
    SyncAck {
        group_id: GroupId,
        target_node_id: NodeId,
    },
}

impl Message {
    /// The group this message belongs to.
    pub fn group_id(&self) -> &GroupId {
        match self {
            Message::SyncRequest { group_id, .. }
            | Message::DataFetchRequest { group_id, .. }
            | Message::DataFetchReply { group_id, .. }
            | Message::ProbeRequest { group_id, .. }
            | Message::ProbeReply { group_id, .. }
            | Message::SleepCommand { group_id, .. }
            | Message::SyncAck { group_id, .. } => group_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SyncRequest { .. } => "sync_request",
            Message::DataFetchRequest { .. } => "fetch_request",
            Message::DataFetchReply { .. } => "fetch_reply",
            Message::ProbeRequest { .. } => "probe_request",
            Message::ProbeReply { .. } => "probe_reply",
            Message::SleepCommand { .. } => "sleep_command",
            Message::SyncAck { .. } => "sync_ack",
        }
    }

    /// Check that every field names something valid in a group of
    /// `group_size` members.
    ///
    /// Fails with [`SyncError::InvalidName`] on a zero sequence, an inverted
    /// range, an out-of-range node id, or an oversized field.
    pub fn validate(&self, group_size: usize) -> Result<()> {
        if self.group_id().as_str().len() > limits::MAX_GROUP_ID_LEN {
            return Err(SyncError::InvalidName("group id too long".into()));
        }
        match self {
            Message::SyncRequest {
                sender_id,
                encoded_version_vector,
                ..
            } => {
                check_member("sender_id", *sender_id, group_size)?;
                if encoded_version_vector.is_empty() {
                    return Err(SyncError::InvalidName("empty version vector".into()));
                }
                if encoded_version_vector.len() > limits::MAX_VECTOR_BYTES {
                    return Err(SyncError::InvalidName("version vector too large".into()));
                }
            }
            Message::DataFetchRequest {
                requester_id,
                producer_id,
                start_seq,
                end_seq,
                ..
            } => {
                check_member("requester_id", *requester_id, group_size)?;
                check_member("producer_id", *producer_id, group_size)?;
                check_range(*start_seq, *end_seq)?;
            }
            Message::DataFetchReply {
                producer_id,
                start_seq,
                end_seq,
                ..
            } => {
                check_member("producer_id", *producer_id, group_size)?;
                check_range(*start_seq, *end_seq)?;
            }
            Message::ProbeRequest { prober_id, .. } => {
                check_member("prober_id", *prober_id, group_size)?;
            }
            Message::ProbeReply { node_id, .. } => {
                check_member("node_id", *node_id, group_size)?;
            }
            Message::SleepCommand { target_node_id, .. }
            | Message::SyncAck { target_node_id, .. } => {
                check_member("target_node_id", *target_node_id, group_size)?;
            }
        }
        Ok(())
    }
}

fn check_member(field: &str, node: NodeId, group_size: usize) -> Result<()> {
    if node.slot() >= group_size {
        return Err(SyncError::InvalidName(format!(
            "{} {} outside group of size {}",
            field, node, group_size
        )));
    }
    Ok(())
}

fn check_range(start: u64, end: u64) -> Result<()> {
    if start == 0 {
        return Err(SyncError::InvalidName("zero start sequence".into()));
    }
    if end < start {
        return Err(SyncError::InvalidName(format!(
            "inverted range {}..={}",
            start, end
        )));
    }
    if end - start >= limits::MAX_FETCH_RANGE {
        return Err(SyncError::InvalidName(format!(
            "range {}..={} too wide",
            start, end
        )));
    }
    Ok(())
}

/// A message on the wire, tagged with its sender and protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub from: NodeId,
    pub message: Message,
}

impl Envelope {
    /// Wrap a message from `from` at the current protocol version.
    pub fn new(from: NodeId, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            from,
            message,
        }
    }

    /// Encode to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Decode(e.to_string()))?;
        if buf.len() > limits::MAX_MESSAGE_BYTES {
            return Err(SyncError::InvalidName(format!(
                "message of {} bytes exceeds limit",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Decode from CBOR bytes, rejecting unknown protocol versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_MESSAGE_BYTES {
            return Err(SyncError::Decode(format!(
                "message of {} bytes exceeds limit",
                bytes.len()
            )));
        }
        let envelope: Envelope =
            ciborium::from_reader(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(SyncError::Decode(format!(
                "unsupported protocol version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
