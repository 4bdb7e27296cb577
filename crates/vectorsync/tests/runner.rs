//! End-to-end tests of the async runner over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use vectorsync::core::{content_type, Keypair, NodeId};
use vectorsync::{
    MemoryNetwork, Node, NodeConfig, NodeHandle, NodeRunner, NodeState, ProtocolConfig,
    VectorSyncError,
};

fn keypair(id: u64) -> Keypair {
    Keypair::from_seed(&[id as u8 + 1; 32])
}

async fn spawn_group(
    network: &Arc<MemoryNetwork>,
    size: usize,
    protocol: ProtocolConfig,
) -> Vec<(NodeHandle, JoinHandle<vectorsync::Result<Node>>)> {
    let mut nodes = Vec::new();
    for id in 0..size as u64 {
        let transport = network.create_transport(NodeId(id)).await;
        let config = NodeConfig::new("runner-test", NodeId(id), size).with_protocol(protocol.clone());
        nodes.push(NodeRunner::spawn(config, keypair(id), Arc::new(transport)).unwrap());
    }
    nodes
}

fn sync_only() -> ProtocolConfig {
    ProtocolConfig {
        duty_cycling: false,
        ..ProtocolConfig::default()
    }
}

async fn wait_for_vector(handle: &NodeHandle, expected: &[u64]) {
    for _ in 0..200 {
        if handle.version_vector().await.unwrap().as_slice() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "vector never reached {:?}, last {:?}",
        expected,
        handle.version_vector().await.unwrap()
    );
}

#[tokio::test]
async fn test_two_runners_converge() {
    let network = MemoryNetwork::new();
    let nodes = spawn_group(&network, 2, sync_only()).await;
    let (a, _) = &nodes[0];
    let (b, _) = &nodes[1];

    for i in 0..3u8 {
        assert_eq!(
            a.publish(vec![i], content_type::USER_DATA).await.unwrap(),
            Some(u64::from(i) + 1)
        );
    }
    b.publish(&b"b"[..], content_type::GEO_DATA).await.unwrap();

    a.sync().await.unwrap();
    b.sync().await.unwrap();
    wait_for_vector(b, &[3, 1]).await;
    wait_for_vector(a, &[3, 1]).await;

    let stats = b.stats().await.unwrap();
    assert!(stats.records_applied >= 3);
    assert_eq!(stats.data_gaps, 0);

    for (handle, task) in nodes {
        handle.shutdown().await.unwrap();
        let node = task.await.unwrap().unwrap();
        assert_eq!(node.log().total(), 4);
    }
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let network = MemoryNetwork::new();
    let mut nodes = spawn_group(&network, 1, sync_only()).await;
    let (handle, task) = nodes.remove(0);

    assert_eq!(handle.state().await.unwrap(), NodeState::Active);
    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert!(matches!(handle.sync().await, Err(VectorSyncError::Shutdown)));
    assert!(matches!(handle.state().await, Err(VectorSyncError::Shutdown)));
}

#[tokio::test]
async fn test_transport_must_match_node() {
    let network = MemoryNetwork::new();
    let transport = network.create_transport(NodeId(1)).await;
    let config = NodeConfig::new("runner-test", NodeId(0), 2);
    let result = NodeRunner::spawn(config, keypair(0), Arc::new(transport));
    assert!(matches!(result, Err(VectorSyncError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let network = MemoryNetwork::new();
    let transport = network.create_transport(NodeId(5)).await;
    let config = NodeConfig::new("runner-test", NodeId(5), 2);
    let result = NodeRunner::spawn(config, keypair(5), Arc::new(transport));
    assert!(matches!(result, Err(VectorSyncError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_group_takes_turns_sleeping() {
    let protocol = ProtocolConfig {
        probe_interval_ms: 5_000,
        reply_window_ms: 500,
        probe_reply_jitter_ms: 100,
        quorum_threshold: 2,
        final_sync_interval_ms: 200,
        sleep_duration_ms: 4_000,
        ..ProtocolConfig::default()
    };
    let network = MemoryNetwork::new();
    let nodes = spawn_group(&network, 4, protocol).await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    let mut sleeps = 0;
    for (handle, _) in &nodes {
        let stats = handle.stats().await.unwrap();
        assert!(stats.wakes <= stats.sleeps);
        sleeps += stats.sleeps;
    }
    assert!(sleeps > 0, "no node ever slept");

    for (handle, task) in nodes {
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
