//! Test fixtures and helpers.
//!
//! Deterministic keys, nodes, records and hand-built protocol messages.

use std::ops::RangeInclusive;

use vectorsync_core::{
    encode_batch, content_type, DataRecord, GroupId, Keypair, NodeId, Signer, SignedRecord,
    VersionVector,
};
use vectorsync_sync::{Message, Node, NodeConfig, ProtocolConfig};

/// Group id used by every fixture.
pub const GROUP: &str = "testkit";

/// The deterministic keypair of node `id`.
pub fn keypair_for(id: u64) -> Keypair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&id.to_le_bytes());
    seed[31] = 0x5a;
    Keypair::from_seed(&seed)
}

/// A node of a `group_size` group with default protocol parameters.
pub fn node(id: u64, group_size: usize) -> Node {
    node_with(id, group_size, ProtocolConfig::default())
}

/// A node of a `group_size` group with the given protocol parameters.
///
/// Panics on an invalid configuration.
pub fn node_with(id: u64, group_size: usize, protocol: ProtocolConfig) -> Node {
    let config = NodeConfig::new(GROUP, NodeId(id), group_size).with_protocol(protocol);
    Node::new(config, keypair_for(id)).expect("fixture config must be valid")
}

/// Protocol parameters scaled down for simulation: rounds take seconds,
/// not minutes.
pub fn fast_protocol() -> ProtocolConfig {
    ProtocolConfig {
        probe_interval_ms: 5_000,
        reply_window_ms: 400,
        probe_reply_jitter_ms: 100,
        quorum_threshold: 2,
        final_sync_rounds: 3,
        final_sync_interval_ms: 200,
        sleep_duration_ms: 8_000,
        fetch_timeout_ms: 300,
        fetch_retries: 2,
        ack_jitter_ms: 50,
        max_batch_size: 50,
        sync_interval_ms: None,
        snapshot_interval_ms: None,
        duty_cycling: true,
    }
}

/// [`fast_protocol`] without duty-cycling.
pub fn sync_only_protocol() -> ProtocolConfig {
    ProtocolConfig {
        duty_cycling: false,
        ..fast_protocol()
    }
}

/// A record of `producer` signed with its fixture key.
pub fn record(producer: u64, seq: u64, payload: &[u8]) -> SignedRecord {
    keypair_for(producer).sign_record(DataRecord::new(
        NodeId(producer),
        seq,
        content_type::USER_DATA,
        payload.to_vec(),
    ))
}

/// Signed records `seqs` of `producer`, with payloads naming their position.
pub fn records(producer: u64, seqs: RangeInclusive<u64>) -> Vec<SignedRecord> {
    seqs.map(|seq| record(producer, seq, format!("{}:{}", producer, seq).as_bytes()))
        .collect()
}

/// A `SyncRequest` advertising `slots`.
pub fn sync_request(sender: u64, slots: &[u64]) -> Message {
    Message::SyncRequest {
        group_id: GroupId::new(GROUP),
        sender_id: NodeId(sender),
        encoded_version_vector: VersionVector::from_slots(slots.to_vec()).encode().into(),
    }
}

/// A `DataFetchReply` carrying `records`, which must be `start..=end` of
/// `producer`.
pub fn fetch_reply(producer: u64, start: u64, end: u64, records: &[SignedRecord]) -> Message {
    Message::DataFetchReply {
        group_id: GroupId::new(GROUP),
        producer_id: NodeId(producer),
        start_seq: start,
        end_seq: end,
        batch: encode_batch(records).into(),
    }
}

/// A `ProbeReply` from `node`.
pub fn probe_reply(node: u64, cumulative_sleep_ms: u64) -> Message {
    Message::ProbeReply {
        group_id: GroupId::new(GROUP),
        node_id: NodeId(node),
        cumulative_sleep_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_differ_per_node() {
        assert_ne!(keypair_for(0).public_key(), keypair_for(1).public_key());
        assert_eq!(keypair_for(3).public_key(), keypair_for(3).public_key());
    }

    #[test]
    fn test_records_verify_under_producer_key() {
        let batch = records(2, 1..=3);
        assert_eq!(batch.len(), 3);
        for (i, r) in batch.iter().enumerate() {
            assert_eq!(r.seq(), i as u64 + 1);
            r.verify(&keypair_for(2).public_key()).unwrap();
        }
    }

    #[test]
    fn test_fast_protocol_is_valid() {
        fast_protocol().validate().unwrap();
        sync_only_protocol().validate().unwrap();
    }

    #[test]
    fn test_fixture_messages_validate() {
        sync_request(0, &[1, 0]).validate(2).unwrap();
        fetch_reply(1, 1, 2, &records(1, 1..=2)).validate(2).unwrap();
        probe_reply(1, 0).validate(2).unwrap();
    }
}
