//! Data records: the immutable entries of a producer's log.
//!
//! A record is created once by its producer, signed, and then replicated
//! unchanged to every member of the group.

use bytes::Bytes;

use crate::canonical::record_signing_bytes;
use crate::crypto::{PublicKey, Signature};
use crate::error::CoreError;
use crate::types::NodeId;

/// Well-known content types.
///
/// Any other `u32` is accepted and carried opaquely.
pub mod content_type {
    /// Application payload.
    pub const USER_DATA: u32 = 0;
    /// Position-tagged application payload.
    pub const GEO_DATA: u32 = 1;
    /// Reply to a sync request.
    pub const SYNC_REPLY: u32 = 9668;
    /// Group configuration information.
    pub const CONFIGURE_INFO: u32 = 9669;
    /// A serialized version vector.
    pub const VECTOR_CLOCK: u32 = 9670;
}

/// A single entry in a producer's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// The node that produced this record.
    pub producer: NodeId,
    /// Position in the producer's log (1-indexed).
    pub seq: u64,
    /// Discriminator for payload interpretation.
    pub content_type: u32,
    /// Opaque application bytes.
    pub payload: Bytes,
}

impl DataRecord {
    /// Create a record.
    pub fn new(producer: NodeId, seq: u64, content_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            producer,
            seq,
            content_type,
            payload: payload.into(),
        }
    }

    /// The canonical bytes covered by the producer's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        record_signing_bytes(self)
    }
}

/// A record together with its producer's signature.
///
/// Records are signed exactly once, at publish time, and forwarded in this
/// form by every replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    /// The record itself.
    pub record: DataRecord,
    /// Signature over [`DataRecord::signing_bytes`].
    pub signature: Signature,
}

impl SignedRecord {
    /// Pair a record with an existing signature.
    pub fn new(record: DataRecord, signature: Signature) -> Self {
        Self { record, signature }
    }

    /// The producer of the record.
    pub fn producer(&self) -> NodeId {
        self.record.producer
    }

    /// The record's sequence number.
    pub fn seq(&self) -> u64 {
        self.record.seq
    }

    /// Check the signature against the producer's public key.
    pub fn verify(&self, producer_key: &PublicKey) -> Result<(), CoreError> {
        producer_key.verify(&self.record.signing_bytes(), &self.signature)
    }
}
