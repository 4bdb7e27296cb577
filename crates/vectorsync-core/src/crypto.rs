//! Record signing and hashing.
//!
//! Producers sign each record's canonical bytes with Ed25519 before the
//! record enters their log. The node only ever sees the [`Signer`] trait, so
//! a host can keep keys in hardware or elsewhere.

use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::{DataRecord, SignedRecord};

/// Signs records before they leave the producing node.
pub trait Signer: Send + Sync {
    fn sign_record(&self, record: DataRecord) -> SignedRecord;
}

/// Blake3 digest, used for log state hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3Hash({})", short_hex(&self.0))
    }
}

/// A producer's Ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check `signature` over `message`.
    ///
    /// A malformed key and a bad signature both fail with
    /// [`CoreError::Decode`]; callers drop the record either way.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CoreError::Decode(format!("bad public key {}: {}", short_hex(&self.0), e)))?;
        key.verify(message, &ed25519_dalek::Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::Decode("record signature does not verify".into()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", short_hex(&self.0))
    }
}

/// Ed25519 signature over a record's canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", short_hex(&self.0))
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = CoreError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 64]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CoreError::Decode(format!("signature of {} bytes, expected 64", bytes.len())))
    }
}

fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

/// The signing key a node uses for its own records.
#[derive(Clone)]
pub struct Keypair {
    key: SigningKey,
}

impl Keypair {
    /// A fresh key from the thread RNG.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// A deterministic key, for tests and provisioned nodes.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.key.sign(message).to_bytes())
    }
}

impl Signer for Keypair {
    fn sign_record(&self, record: DataRecord) -> SignedRecord {
        let signature = self.sign(&record.signing_bytes());
        SignedRecord::new(record, signature)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keypair").field(&self.public_key()).finish()
    }
}
