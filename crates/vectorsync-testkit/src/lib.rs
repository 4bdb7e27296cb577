//! # VectorSync Testkit
//!
//! Testing utilities for VectorSync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Simulation**: A deterministic, virtual-time network of protocol nodes
//!   with link delay, seeded loss and partitions
//! - **Golden vectors**: Pinned signing bytes, signatures and vector encodings
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Deterministic keys, nodes, records and messages
//!
//! ## Simulation
//!
//! ```rust
//! use vectorsync_testkit::fixtures::sync_only_protocol;
//! use vectorsync_testkit::sim::{SimConfig, Simulation};
//!
//! let mut sim = Simulation::new(3, sync_only_protocol(), SimConfig::default()).unwrap();
//! sim.publish(0, b"hello");
//! sim.sync(0);
//! sim.run_for(1_000);
//! assert!(sim.all_hold(&[1, 0, 0]));
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use vectorsync_testkit::generators::GroupScenario;
//!
//! proptest! {
//!     #[test]
//!     fn group_converges(scenario: GroupScenario) {
//!         // build a Simulation from scenario.sim and replay scenario.publishes
//!     }
//! }
//! ```
//!
//! ## Golden Vectors
//!
//! ```rust
//! use vectorsync_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, _) in verify_all_vectors() {
//!     assert!(matches, "{}", name);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod sim;
pub mod vectors;

pub use fixtures::{fast_protocol, keypair_for, node, node_with, sync_only_protocol};
pub use generators::GroupScenario;
pub use sim::{SimConfig, SimStats, Simulation};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
