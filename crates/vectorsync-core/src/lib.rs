//! # VectorSync Core
//!
//! Pure primitives for VectorSync: node identities, version vectors,
//! data records, canonical encoding and record signing.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over the values every VectorSync node exchanges with its group.
//!
//! ## Key Types
//!
//! - [`NodeId`] - Index of a group member in the version vector
//! - [`GroupId`] - Opaque identifier of a synchronization group
//! - [`VersionVector`] - One contiguous-prefix counter per producer
//! - [`DataRecord`] - A single immutable entry in a producer's log
//! - [`SignedRecord`] - A record plus its producer's signature
//!
//! ## Canonicalization
//!
//! Version vectors, fetch batches and signed record bytes use deterministic
//! CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod record;
pub mod types;
pub mod version_vector;

pub use canonical::{
    decode_batch, decode_version_vector, encode_batch, encode_version_vector,
    record_signing_bytes, BatchEntry,
};
pub use crypto::{Blake3Hash, Keypair, PublicKey, Signature, Signer};
pub use error::{CoreError, Result};
pub use record::{content_type, DataRecord, SignedRecord};
pub use types::{GroupId, NodeId};
pub use version_vector::{VectorOrdering, VersionVector};
