//! Golden test vectors for deterministic verification.
//!
//! Every replica must reproduce the exact bytes a producer signed, and every
//! peer must read a version vector the same way. These vectors pin both
//! encodings, plus the Ed25519 signature and public key that follow from a
//! fixed seed.

use vectorsync_core::{content_type, encode_version_vector, DataRecord, Keypair, NodeId};

/// A golden record-signing vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    pub producer: u64,
    pub seq: u64,
    pub content_type: u32,
    pub payload: &'static [u8],
    /// Expected canonical signing bytes (hex).
    pub expected_signing_bytes: &'static str,
    /// Expected public key (hex).
    pub expected_public_key: &'static str,
    /// Expected signature (hex).
    pub expected_signature: &'static str,
}

/// A golden version-vector encoding.
#[derive(Debug, Clone)]
pub struct VectorEncoding {
    pub slots: &'static [u64],
    /// Expected CBOR (hex).
    pub expected: &'static str,
}

const OPAQUE_PAYLOAD: [u8; 32] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
    0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
    0x1e, 0x1f,
];

/// Get all golden record vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "user data hello",
            seed: [0x42; 32],
            producer: 0,
            seq: 1,
            content_type: content_type::USER_DATA,
            payload: b"hello",
            expected_signing_bytes:
                "a50074766563746f7273796e632d7265636f72642d7630010002010300044568656c6c6f",
            expected_public_key:
                "2152f8d19b791d24453242e15f2eab6cb7cffa7b6a5ed30097960e069881db12",
            expected_signature: "f211646df443ed90932098ba6048e48c2c9930f05623ea08d8579816b677162898ea9036ca5f05cc2c5df52311d811516cc48cd5d1933fdb4d2ca76b08f6b103",
        },
        GoldenVector {
            name: "geo data second record",
            seed: [0x42; 32],
            producer: 0,
            seq: 2,
            content_type: content_type::GEO_DATA,
            payload: b"world",
            expected_signing_bytes:
                "a50074766563746f7273796e632d7265636f72642d76300100020203010445776f726c64",
            expected_public_key:
                "2152f8d19b791d24453242e15f2eab6cb7cffa7b6a5ed30097960e069881db12",
            expected_signature: "c8b2ff751963f4b0ab99eb687290177ef80e9c8500b9f4f7cb2c983e47c6c544b1c6654c95b5a7a46d0d6e5ee69d83113811961c25116c281e899a8524d3680b",
        },
        GoldenVector {
            name: "empty payload, two-byte sequence",
            seed: [0x00; 32],
            producer: 7,
            seq: 300,
            content_type: content_type::VECTOR_CLOCK,
            payload: b"",
            expected_signing_bytes:
                "a50074766563746f7273796e632d7265636f72642d763001070219012c031925c60440",
            expected_public_key:
                "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29",
            expected_signature: "35407eb4fddc8018c7688a1f0a0e9258cc7e4889a05ec4f62cd2a2549c992b8737dfee740d9211a41a8c140c27a6ae00be0615d59ab988bacb41cc390ff9c308",
        },
        GoldenVector {
            name: "opaque content type",
            seed: [0x07; 32],
            producer: 3,
            seq: 70_000,
            content_type: 123_456,
            payload: &OPAQUE_PAYLOAD,
            expected_signing_bytes: "a50074766563746f7273796e632d7265636f72642d76300103021a00011170031a0001e240045820000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
            expected_public_key:
                "ea4a6c63e29c520abef5507b132ec5f9954776aebebe7b92421eea691446d22c",
            expected_signature: "8db1485f213193e851d8d9197dc94fe7919d7ecc05912f2e7cd503ec0465e1a5eafc562607af0d89a632462feaa2b4cff1d10a1da648e2488240e18a4a9a6a09",
        },
    ]
}

/// Get all golden version-vector encodings.
pub fn vector_encodings() -> Vec<VectorEncoding> {
    vec![
        VectorEncoding {
            slots: &[],
            expected: "80",
        },
        VectorEncoding {
            slots: &[0, 0, 0],
            expected: "83000000",
        },
        VectorEncoding {
            slots: &[3, 0, 1],
            expected: "83030001",
        },
        VectorEncoding {
            slots: &[24, 255, 256, 65_536, 4_294_967_296],
            expected: "85181818ff1901001a000100001b0000000100000000",
        },
    ]
}

/// The record a golden vector describes.
pub fn record_from_vector(vector: &GoldenVector) -> DataRecord {
    DataRecord::new(
        NodeId(vector.producer),
        vector.seq,
        vector.content_type,
        vector.payload.to_vec(),
    )
}

/// Check every golden vector, returning `(name, matches, got)` per vector.
///
/// `got` is the signature hex actually produced.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let keypair = Keypair::from_seed(&v.seed);
            let bytes = record_from_vector(v).signing_bytes();
            let signature = keypair.sign(&bytes).to_hex();
            let matches = hex::encode(&bytes) == v.expected_signing_bytes
                && keypair.public_key().to_hex() == v.expected_public_key
                && signature == v.expected_signature;
            (v.name.to_string(), matches, signature)
        })
        .chain(vector_encodings().iter().map(|v| {
            let got = hex::encode(encode_version_vector(v.slots));
            (format!("vector {:?}", v.slots), got == v.expected, got)
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectorsync_core::{Signer, VersionVector};

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, got) in verify_all_vectors() {
            assert!(matches, "vector '{}' mismatched, got {}", name, got);
        }
    }

    #[test]
    fn test_signed_vectors_verify() {
        for vector in all_vectors() {
            let keypair = Keypair::from_seed(&vector.seed);
            let signed = keypair.sign_record(record_from_vector(&vector));
            signed
                .verify(&keypair.public_key())
                .unwrap_or_else(|e| panic!("vector '{}': {}", vector.name, e));
        }
    }

    #[test]
    fn test_vector_encodings_decode_back() {
        for encoding in vector_encodings() {
            let bytes = hex::decode(encoding.expected).unwrap();
            let vv = VersionVector::decode(&bytes, encoding.slots.len()).unwrap();
            assert_eq!(vv.as_slice(), encoding.slots);
        }
    }
}
