//! Per-producer append-only data logs.
//!
//! A node keeps one log for every member of its group, its own included.
//! Each log is contiguous from sequence 1: record `k` has sequence `k + 1`.
//! Logs are extended by local publishing and by applying fetched batches;
//! nothing is ever removed or reordered.

use tracing::trace;

use vectorsync_core::{Blake3Hash, NodeId, SignedRecord};

use crate::error::{Result, StoreError};

/// Domain prefix for log state hashes.
const STATE_HASH_DOMAIN: &[u8] = b"vectorsync-log-v0:";

/// The replicated logs of every producer in a group.
#[derive(Debug, Clone)]
pub struct DataLog {
    logs: Vec<Vec<SignedRecord>>,
}

impl DataLog {
    /// Create empty logs for a group of `group_size` producers.
    pub fn new(group_size: usize) -> Self {
        Self {
            logs: vec![Vec::new(); group_size],
        }
    }

    /// Number of producers tracked.
    pub fn group_size(&self) -> usize {
        self.logs.len()
    }

    /// Number of records held for `producer`. Unknown producers hold none.
    pub fn len(&self, producer: NodeId) -> u64 {
        self.logs
            .get(producer.slot())
            .map(|log| log.len() as u64)
            .unwrap_or(0)
    }

    /// Whether no records are held for any producer.
    pub fn is_empty(&self) -> bool {
        self.logs.iter().all(Vec::is_empty)
    }

    /// Total records held across all producers.
    pub fn total(&self) -> u64 {
        self.logs.iter().map(|log| log.len() as u64).sum()
    }

    /// Per-producer lengths in slot order.
    pub fn lengths(&self) -> Vec<u64> {
        self.logs.iter().map(|log| log.len() as u64).collect()
    }

    /// Append one record to its producer's log.
    ///
    /// The record's sequence must be exactly one past the current length.
    /// Returns the new length.
    pub fn append(&mut self, record: SignedRecord) -> Result<u64> {
        let producer = record.producer();
        let log = self.log_mut(producer)?;
        let expected = log.len() as u64 + 1;
        if record.seq() != expected {
            return Err(StoreError::NonContiguous {
                producer,
                expected,
                got: record.seq(),
            });
        }
        log.push(record);
        trace!(producer = %producer, seq = expected, "appended record");
        Ok(expected)
    }

    /// Append a run of records to `producer`'s log.
    ///
    /// Records already held (sequence `<=` current length) are skipped, so
    /// re-applying an overlapping batch is harmless. Every record must belong
    /// to `producer`, and the first new record must continue the log.
    /// Nothing is appended if any record is rejected. Returns the new length.
    pub fn extend(
        &mut self,
        producer: NodeId,
        records: impl IntoIterator<Item = SignedRecord>,
    ) -> Result<u64> {
        let log = self.log_mut(producer)?;
        let mut next = log.len() as u64 + 1;
        let mut fresh = Vec::new();
        for record in records {
            if record.producer() != producer {
                return Err(StoreError::WrongProducer {
                    expected: producer,
                    got: record.producer(),
                });
            }
            if record.seq() < next && fresh.is_empty() {
                continue;
            }
            if record.seq() != next {
                return Err(StoreError::NonContiguous {
                    producer,
                    expected: next,
                    got: record.seq(),
                });
            }
            fresh.push(record);
            next += 1;
        }
        let added = fresh.len();
        log.extend(fresh);
        if added > 0 {
            trace!(producer = %producer, added, len = next - 1, "extended log");
        }
        Ok(next - 1)
    }

    /// Borrow the records `[start, end]` (inclusive) of `producer`.
    pub fn range(&self, producer: NodeId, start: u64, end: u64) -> Result<&[SignedRecord]> {
        let log = self.log(producer)?;
        let len = log.len() as u64;
        if start == 0 || start > end || end > len {
            return Err(StoreError::RangeUnavailable {
                producer,
                start,
                end,
                len,
            });
        }
        Ok(&log[(start - 1) as usize..end as usize])
    }

    /// The record at `seq` of `producer`, if held.
    pub fn get(&self, producer: NodeId, seq: u64) -> Option<&SignedRecord> {
        if seq == 0 {
            return None;
        }
        self.logs
            .get(producer.slot())
            .and_then(|log| log.get((seq - 1) as usize))
    }

    /// All records held for `producer`.
    pub fn records(&self, producer: NodeId) -> &[SignedRecord] {
        self.logs
            .get(producer.slot())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Deterministic digest of `producer`'s log.
    ///
    /// Two replicas holding the same records for a producer produce the same
    /// hash. Returns `None` for an empty log.
    ///
    /// Algorithm: `Blake3(domain || producer || sig_1 || ... || sig_n)`.
    pub fn state_hash(&self, producer: NodeId) -> Option<Blake3Hash> {
        let log = self.logs.get(producer.slot())?;
        if log.is_empty() {
            return None;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(STATE_HASH_DOMAIN);
        hasher.update(&producer.as_u64().to_be_bytes());
        for record in log {
            hasher.update(record.signature.as_bytes());
        }
        Some(Blake3Hash(*hasher.finalize().as_bytes()))
    }

    fn log(&self, producer: NodeId) -> Result<&Vec<SignedRecord>> {
        let group_size = self.logs.len();
        self.logs
            .get(producer.slot())
            .ok_or(StoreError::UnknownProducer {
                producer,
                group_size,
            })
    }

    fn log_mut(&mut self, producer: NodeId) -> Result<&mut Vec<SignedRecord>> {
        let group_size = self.logs.len();
        self.logs
            .get_mut(producer.slot())
            .ok_or(StoreError::UnknownProducer {
                producer,
                group_size,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vectorsync_core::{content_type, DataRecord, Keypair, Signer};

    fn signed(keypair: &Keypair, producer: u64, seq: u64) -> SignedRecord {
        keypair.sign_record(DataRecord::new(
            NodeId(producer),
            seq,
            content_type::USER_DATA,
            format!("{}-{}", producer, seq).into_bytes(),
        ))
    }

    #[test]
    fn test_append_contiguous() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(2);
        assert_eq!(log.append(signed(&kp, 0, 1)).unwrap(), 1);
        assert_eq!(log.append(signed(&kp, 0, 2)).unwrap(), 2);
        assert_eq!(log.len(NodeId(0)), 2);
        assert_eq!(log.len(NodeId(1)), 0);
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn test_append_rejects_gap_and_duplicate() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(1);
        log.append(signed(&kp, 0, 1)).unwrap();

        assert!(matches!(
            log.append(signed(&kp, 0, 3)),
            Err(StoreError::NonContiguous {
                expected: 2,
                got: 3,
                ..
            })
        ));
        assert!(matches!(
            log.append(signed(&kp, 0, 1)),
            Err(StoreError::NonContiguous { .. })
        ));
        assert_eq!(log.len(NodeId(0)), 1);
    }

    #[test]
    fn test_append_unknown_producer() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(1);
        assert!(matches!(
            log.append(signed(&kp, 4, 1)),
            Err(StoreError::UnknownProducer { group_size: 1, .. })
        ));
    }

    #[test]
    fn test_extend_skips_held_prefix() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(1);
        log.extend(NodeId(0), (1..=3).map(|s| signed(&kp, 0, s))).unwrap();

        // Overlapping batch 2..=5 appends only 4 and 5.
        let len = log
            .extend(NodeId(0), (2..=5).map(|s| signed(&kp, 0, s)))
            .unwrap();
        assert_eq!(len, 5);
        let seqs: Vec<u64> = log.records(NodeId(0)).iter().map(|r| r.seq()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_extend_is_all_or_nothing() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(2);
        let batch = vec![signed(&kp, 0, 1), signed(&kp, 1, 2)];
        assert!(matches!(
            log.extend(NodeId(0), batch),
            Err(StoreError::WrongProducer { .. })
        ));
        assert_eq!(log.len(NodeId(0)), 0);

        let gapped = vec![signed(&kp, 0, 1), signed(&kp, 0, 3)];
        assert!(log.extend(NodeId(0), gapped).is_err());
        assert_eq!(log.len(NodeId(0)), 0);
    }

    #[test]
    fn test_range() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(1);
        log.extend(NodeId(0), (1..=4).map(|s| signed(&kp, 0, s))).unwrap();

        let slice = log.range(NodeId(0), 2, 3).unwrap();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].seq(), 2);
        assert_eq!(slice[1].seq(), 3);

        assert!(log.range(NodeId(0), 0, 2).is_err());
        assert!(log.range(NodeId(0), 3, 2).is_err());
        assert!(matches!(
            log.range(NodeId(0), 3, 5),
            Err(StoreError::RangeUnavailable { len: 4, .. })
        ));
    }

    #[test]
    fn test_get() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut log = DataLog::new(1);
        log.append(signed(&kp, 0, 1)).unwrap();
        assert_eq!(log.get(NodeId(0), 1).map(|r| r.seq()), Some(1));
        assert!(log.get(NodeId(0), 0).is_none());
        assert!(log.get(NodeId(0), 2).is_none());
        assert!(log.get(NodeId(9), 1).is_none());
    }

    #[test]
    fn test_state_hash_matches_across_replicas() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut a = DataLog::new(1);
        let mut b = DataLog::new(1);
        assert!(a.state_hash(NodeId(0)).is_none());

        a.extend(NodeId(0), (1..=3).map(|s| signed(&kp, 0, s))).unwrap();
        b.extend(NodeId(0), (1..=2).map(|s| signed(&kp, 0, s))).unwrap();
        assert_ne!(a.state_hash(NodeId(0)), b.state_hash(NodeId(0)));

        b.append(signed(&kp, 0, 3)).unwrap();
        assert_eq!(a.state_hash(NodeId(0)), b.state_hash(NodeId(0)));
    }

    proptest! {
        #[test]
        fn test_log_stays_contiguous(
            batches in prop::collection::vec((1u64..20, 0u64..10), 1..20),
        ) {
            let kp = Keypair::from_seed(&[3; 32]);
            let mut log = DataLog::new(1);
            for (start, width) in batches {
                let records: Vec<_> = (start..=start + width)
                    .map(|s| signed(&kp, 0, s))
                    .collect();
                let before = log.len(NodeId(0));
                match log.extend(NodeId(0), records) {
                    Ok(len) => prop_assert!(len >= before),
                    Err(_) => prop_assert_eq!(log.len(NodeId(0)), before),
                }
            }
            for (k, record) in log.records(NodeId(0)).iter().enumerate() {
                prop_assert_eq!(record.seq(), k as u64 + 1);
            }
        }
    }
}
