//! Proptest generators for property-based testing.

use proptest::prelude::*;

use vectorsync_core::{content_type, Keypair, NodeId, VersionVector};

use crate::sim::SimConfig;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a member id of a `group_size` group.
pub fn node_id(group_size: usize) -> impl Strategy<Value = NodeId> {
    (0..group_size as u64).prop_map(NodeId)
}

/// Generate a version vector of `group_size` slots, each at most `max_seq`.
pub fn version_vector(group_size: usize, max_seq: u64) -> impl Strategy<Value = VersionVector> {
    prop::collection::vec(0..=max_seq, group_size).prop_map(VersionVector::from_slots)
}

/// Generate a content type, favouring the well-known ones.
pub fn any_content_type() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(content_type::USER_DATA),
        Just(content_type::GEO_DATA),
        Just(content_type::SYNC_REPLY),
        Just(content_type::CONFIGURE_INFO),
        Just(content_type::VECTOR_CLOCK),
        any::<u32>(),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A publishing workload for a simulated group.
#[derive(Debug, Clone)]
pub struct GroupScenario {
    pub group_size: usize,
    /// `(producer, content_type, payload)` in publish order.
    pub publishes: Vec<(u64, u32, Vec<u8>)>,
    pub sim: SimConfig,
}

impl GroupScenario {
    /// Records each producer publishes.
    pub fn expected_vector(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.group_size];
        for (producer, _, _) in &self.publishes {
            counts[*producer as usize] += 1;
        }
        counts
    }
}

impl Arbitrary for GroupScenario {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (2usize..=5)
            .prop_flat_map(|group_size| {
                (
                    Just(group_size),
                    prop::collection::vec(
                        (0..group_size as u64, any_content_type(), payload(32)),
                        0..40,
                    ),
                    0.0f64..0.3,     // loss rate
                    0u64..=20,       // link jitter
                    any::<u64>(),    // seed
                )
            })
            .prop_map(|(group_size, publishes, loss_rate, link_jitter_ms, seed)| GroupScenario {
                group_size,
                publishes,
                sim: SimConfig {
                    link_delay_ms: 5,
                    link_jitter_ms,
                    loss_rate,
                    seed,
                },
            })
            .boxed()
    }
}
