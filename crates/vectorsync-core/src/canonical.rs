//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for the values
//! VectorSync signs or ships between peers:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! Deterministic bytes matter for record signatures: every replica must
//! reproduce the exact bytes the producer signed.

use bytes::Bytes;
use ciborium::value::{Integer, Value};

use crate::crypto::Signature;
use crate::error::{CoreError, Result};
use crate::record::{DataRecord, SignedRecord};

/// Domain tag mixed into every signed record.
const RECORD_DOMAIN: &str = "vectorsync-record-v0";

/// Record field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const DOMAIN: u64 = 0;
    pub const PRODUCER: u64 = 1;
    pub const SEQ: u64 = 2;
    pub const CONTENT_TYPE: u64 = 3;
    pub const PAYLOAD: u64 = 4;
}

/// One decoded entry of a fetch batch.
///
/// Batches carry no producer or sequence: both follow from the requested
/// range and the entry's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub content_type: u32,
    pub payload: Bytes,
    pub signature: Signature,
}

/// The canonical bytes a producer signs for a record.
pub fn record_signing_bytes(record: &DataRecord) -> Vec<u8> {
    let value = Value::Map(vec![
        (uint(keys::DOMAIN), Value::Text(RECORD_DOMAIN.to_string())),
        (uint(keys::PRODUCER), uint(record.producer.as_u64())),
        (uint(keys::SEQ), uint(record.seq)),
        (uint(keys::CONTENT_TYPE), uint(record.content_type.into())),
        (uint(keys::PAYLOAD), Value::Bytes(record.payload.to_vec())),
    ]);
    encode_cbor_value_canonical(&value)
}

/// Encode version vector slots as a canonical CBOR array of unsigned integers.
pub fn encode_version_vector(slots: &[u64]) -> Vec<u8> {
    let value = Value::Array(slots.iter().map(|s| uint(*s)).collect());
    encode_cbor_value_canonical(&value)
}

/// Decode version vector slots.
///
/// Length is not checked here; see [`crate::VersionVector::decode`].
pub fn decode_version_vector(bytes: &[u8]) -> Result<Vec<u64>> {
    match parse_value(bytes)? {
        Value::Array(items) => items.into_iter().map(expect_u64).collect(),
        other => Err(CoreError::Decode(format!(
            "version vector must be an array, got {}",
            kind_name(&other)
        ))),
    }
}

/// Encode signed records as a fetch batch.
///
/// Format: array of `[content_type, payload, signature]` triples.
pub fn encode_batch(records: &[SignedRecord]) -> Vec<u8> {
    let entries = records
        .iter()
        .map(|r| {
            Value::Array(vec![
                uint(r.record.content_type.into()),
                Value::Bytes(r.record.payload.to_vec()),
                Value::Bytes(r.signature.0.to_vec()),
            ])
        })
        .collect();
    encode_cbor_value_canonical(&Value::Array(entries))
}

/// Decode a fetch batch.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<BatchEntry>> {
    let items = match parse_value(bytes)? {
        Value::Array(items) => items,
        other => {
            return Err(CoreError::Decode(format!(
                "batch must be an array, got {}",
                kind_name(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let fields = match item {
                Value::Array(fields) if fields.len() == 3 => fields,
                _ => return Err(CoreError::Decode(format!("batch entry {} malformed", i))),
            };
            let mut fields = fields.into_iter();
            let content_type = match fields.next() {
                Some(Value::Integer(n)) => u32::try_from(n)
                    .map_err(|_| CoreError::Decode(format!("entry {} content type", i)))?,
                _ => return Err(CoreError::Decode(format!("entry {} content type", i))),
            };
            let payload = match fields.next() {
                Some(Value::Bytes(b)) => Bytes::from(b),
                _ => return Err(CoreError::Decode(format!("entry {} payload", i))),
            };
            let signature = match fields.next() {
                Some(Value::Bytes(b)) => Signature::try_from(b.as_slice())?,
                _ => return Err(CoreError::Decode(format!("entry {} signature", i))),
            };
            Ok(BatchEntry {
                content_type,
                payload,
                signature,
            })
        })
        .collect()
}

fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

fn parse_value(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::Decode(e.to_string()))
}

fn expect_u64(value: Value) -> Result<u64> {
    match value {
        Value::Integer(n) => {
            u64::try_from(n).map_err(|_| CoreError::Decode("negative counter".into()))
        }
        other => Err(CoreError::Decode(format!(
            "expected unsigned integer, got {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "bytes",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(..) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        _ => buf.push(0xf6),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
