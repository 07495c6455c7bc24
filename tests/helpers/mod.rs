//! Reusable helpers for multi-node integration tests.
//!
//! Nodes are wired together through a shared [`MemoryNetwork`]; links are
//! explicit, so each test builds exactly the topology it needs. Nodes use
//! deterministic keys so a test can rebuild a node's keypair to sign
//! hand-crafted envelopes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use starwave_core::channel::DhGroup;
use starwave_core::config::NodeConfig;
use starwave_core::identity::NodeKeypair;
use starwave_core::relay::{MemoryNetwork, MemoryTransport};
use starwave_core::Node;
use tokio::sync::broadcast;

/// How long tests wait for an event that should arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long tests wait to be sure an event does not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// A started node together with its in-memory transport.
pub struct TestNode {
    pub node: Node,
    pub transport: Arc<MemoryTransport>,
    pub seed: u64,
}

impl TestNode {
    /// Returns the node address.
    pub fn address(&self) -> String {
        self.node.address()
    }

    /// Rebuilds the node's keypair.
    pub fn keypair(&self) -> NodeKeypair {
        keypair_from_seed(self.seed)
    }
}

/// Derives a deterministic keypair from a small seed.
pub fn keypair_from_seed(seed: u64) -> NodeKeypair {
    NodeKeypair::from_secret_hex(&format!("{:064x}", seed + 1)).expect("valid secret key")
}

/// 64-bit prime group, small enough to keep handshakes fast in debug builds.
pub fn small_group() -> DhGroup {
    DhGroup::from_hex("ffffffffffffffc5", "05").expect("valid group")
}

/// Test configuration accepting the small group.
pub fn test_config() -> NodeConfig {
    NodeConfig::default().with_min_dh_prime_bits(64)
}

/// Creates and starts a node on `network` using the small DH group.
pub async fn spawn_node(network: &MemoryNetwork, seed: u64) -> TestNode {
    spawn_node_with(network, seed, test_config(), small_group()).await
}

/// Creates and starts a node with explicit configuration and DH group.
pub async fn spawn_node_with(
    network: &MemoryNetwork,
    seed: u64,
    config: NodeConfig,
    group: DhGroup,
) -> TestNode {
    let node = Node::with_group(keypair_from_seed(seed), config, group);
    let transport = Arc::new(network.transport(node.address()));
    node.register_transport(transport.clone()).await;
    node.start().await.expect("node should start");
    TestNode {
        node,
        transport,
        seed,
    }
}

/// Links consecutive nodes: `nodes[0] - nodes[1] - ... - nodes[n-1]`.
pub async fn link_line(network: &MemoryNetwork, nodes: &[&TestNode]) {
    for pair in nodes.windows(2) {
        network.link(&pair[0].address(), &pair[1].address()).await;
    }
}

/// Waits for the next event, failing the test on timeout.
pub async fn recv_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("event should arrive in time")
        .expect("event channel open")
}

/// Returns true if no event arrives within the quiet period.
pub async fn stays_quiet<T: Clone>(rx: &mut broadcast::Receiver<T>) -> bool {
    tokio::time::timeout(QUIET_PERIOD, rx.recv()).await.is_err()
}
