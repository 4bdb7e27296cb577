//! Sleep/wake rotation across a simulated group.

use std::collections::BTreeSet;

use proptest::prelude::*;

use vectorsync_core::NodeId;
use vectorsync_sync::{select_designee, NodeState, ProtocolConfig};
use vectorsync_testkit::fixtures::{fast_protocol, sync_only_protocol};
use vectorsync_testkit::sim::{SimConfig, Simulation};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn group(size: usize, seed: u64) -> Simulation {
    let config = SimConfig {
        seed,
        ..SimConfig::default()
    };
    Simulation::new(size, fast_protocol(), config).unwrap()
}

#[test]
fn test_every_member_takes_a_turn() {
    init_tracing();
    let mut sim = group(4, 3);
    sim.start();
    sim.run_for(300_000);

    for node in sim.nodes() {
        assert!(
            node.stats().sleeps > 0,
            "node {} never slept: {:?}",
            node.id(),
            node.stats()
        );
    }
}

#[test]
fn test_designations_lead_to_sleep() {
    let mut sim = group(4, 11);
    sim.start();
    sim.run_for(120_000);

    let designated: u64 = sim.nodes().map(|n| n.times_designated()).sum();
    let sleeps: u64 = sim.nodes().map(|n| n.stats().sleeps).sum();
    assert!(sleeps > 0);
    // A barrier may still be running at the deadline.
    assert!(designated >= sleeps);
    assert!(designated - sleeps <= sim.len() as u64);
}

#[test]
fn test_sleepers_wake_on_schedule() {
    init_tracing();
    let protocol = fast_protocol();
    let sleep_ms = protocol.sleep_duration_ms as i64;
    let settle_ms = protocol.final_sync_interval_ms as i64;
    let mut sim = group(3, 5);
    sim.start();

    let slept = sim.run_until_with(120_000, |sim| {
        sim.states().contains(&NodeState::Sleeping)
    });
    assert!(slept);
    let sleeper = sim
        .nodes()
        .find(|n| n.state() == NodeState::Sleeping)
        .map(|n| n.id().0)
        .unwrap();
    let sleep_start = sim.node(sleeper).sleep_start().unwrap();

    sim.run_until(sleep_start + sleep_ms);
    let node = sim.node(sleeper);
    assert_eq!(node.state(), NodeState::Intermediate);
    assert_eq!(node.woke_at(), Some(sleep_start + sleep_ms));
    assert_eq!(node.stats().wakes, 1);

    sim.run_until(sleep_start + sleep_ms + settle_ms);
    assert_eq!(sim.node(sleeper).state(), NodeState::Active);
}

#[test]
fn test_host_wake_ends_sleep_early() {
    let mut sim = group(3, 5);
    sim.start();
    assert!(sim.run_until_with(120_000, |sim| {
        sim.states().contains(&NodeState::Sleeping)
    }));
    let sleeper = sim
        .nodes()
        .find(|n| n.state() == NodeState::Sleeping)
        .map(|n| n.id().0)
        .unwrap();

    sim.run_for(100);
    let woke_at = sim.now();
    sim.wake(sleeper);

    let node = sim.node(sleeper);
    assert_eq!(node.state(), NodeState::Intermediate);
    assert_eq!(node.woke_at(), Some(woke_at));
    assert_eq!(node.stats().wakes, 1);
    // The cancelled wake timer must not fire a second wake.
    sim.run_for(fast_protocol().sleep_duration_ms + 500);
    assert_eq!(sim.node(sleeper).stats().wakes, 1);
}

#[test]
fn test_sleepers_catch_up_after_waking() {
    let protocol = ProtocolConfig {
        sync_interval_ms: Some(1_000),
        ..fast_protocol()
    };
    let mut sim = Simulation::new(4, protocol, SimConfig::default()).unwrap();
    sim.start();

    // Publish while somebody sleeps, then let the group settle.
    assert!(sim.run_until_with(120_000, |sim| {
        sim.states().contains(&NodeState::Sleeping)
    }));
    for id in 0..4u64 {
        if sim.node(id).state() == NodeState::Active {
            sim.publish(id, b"while you slept");
        }
    }
    let expected: Vec<u64> = sim.nodes().map(|n| n.log().len(n.id())).collect();

    let done = sim.run_until_with(sim.now() + 120_000, |sim| sim.all_hold(&expected));
    assert!(done, "expected {:?}, got {:?}", expected, sim.vectors());
    assert!(sim.nodes().map(|n| n.stats().ignored_while_sleeping).sum::<u64>() > 0);
}

#[test]
fn test_no_sleep_without_duty_cycling() {
    let mut sim = Simulation::new(4, sync_only_protocol(), SimConfig::default()).unwrap();
    sim.start();
    sim.run_for(120_000);

    for node in sim.nodes() {
        assert_eq!(node.state(), NodeState::Active);
        assert_eq!(node.stats().probes_sent, 0);
        assert_eq!(node.stats().sleeps, 0);
    }
}

#[test]
fn test_same_seed_same_rotation() {
    let run = |seed| {
        let mut sim = group(4, seed);
        sim.start();
        for id in 0..4 {
            sim.publish(id, b"seeded");
        }
        sim.run_for(90_000);
        let sleep: Vec<u64> = sim.nodes().map(|n| n.cumulative_sleep_ms()).collect();
        (sim.vectors(), sim.states(), sleep, sim.stats().clone())
    };
    assert_eq!(run(21), run(21));
}

proptest! {
    /// Crediting each designee with its sleep makes every member take a turn
    /// before anyone sleeps twice.
    #[test]
    fn prop_rotation_is_fair(group_size in 2usize..8, sleep_ms in 1u64..100_000, laps in 1usize..4) {
        let mut cumulative = vec![0u64; group_size];
        let mut lap = BTreeSet::new();
        for _ in 0..group_size * laps {
            let designee = select_designee(
                cumulative.iter().enumerate().map(|(i, c)| (NodeId(i as u64), *c)),
            )
            .unwrap();
            prop_assert!(lap.insert(designee), "{} chosen twice in one lap", designee);
            cumulative[designee.slot()] += sleep_ms;
            if lap.len() == group_size {
                lap.clear();
            }
        }
        prop_assert!(cumulative.iter().all(|c| *c == sleep_ms * laps as u64));
    }
}
