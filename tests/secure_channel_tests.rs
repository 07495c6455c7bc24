//! End-to-end secure channel tests.
//!
//! Handshakes and encrypted messages travel through real relay engines over
//! the in-memory transport; the negotiator listeners answer handshakes on
//! their own.

mod helpers;

use std::time::Duration;

use serde_json::json;
use starwave_core::channel::{ChannelError, ChannelState, DhGroup};
use starwave_core::envelope::EnvelopeKind;
use starwave_core::relay::MemoryNetwork;
use starwave_core::NodeError;

use helpers::{link_line, recv_event, spawn_node, spawn_node_with, stays_quiet, test_config, EVENT_TIMEOUT};

#[tokio::test]
async fn handshake_and_encrypted_message_between_neighbors() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    link_line(&network, &[&a, &b]).await;

    let handle = a.node.connect(&b.address()).await.unwrap();
    let secret = handle.wait(EVENT_TIMEOUT).await.unwrap();

    assert_eq!(Some(secret), b.node.channel().shared_secret(&a.address()).await);
    assert_eq!(
        a.node.channel().state(&b.address()).await,
        ChannelState::Established
    );

    let mut decrypted = b.node.subscribe_decrypted();
    let sent = a
        .node
        .send_encrypted(&b.address(), json!({"text": "top secret"}))
        .await
        .unwrap();
    assert_eq!(sent.kind(), EnvelopeKind::Encrypted);

    let message = recv_event(&mut decrypted).await;
    assert_eq!(message.from, a.address());
    assert_eq!(message.message, json!({"text": "top secret"}));
    assert_eq!(message.source.kind(), EnvelopeKind::Encrypted);
}

#[tokio::test]
async fn channel_through_relay_hides_plaintext_from_relay() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    let c = spawn_node(&network, 3).await;
    link_line(&network, &[&a, &b, &c]).await;

    let handle = a.node.connect(&c.address()).await.unwrap();
    handle.wait(EVENT_TIMEOUT).await.unwrap();
    assert!(c.node.channel().is_connected(&a.address()).await);
    assert!(!b.node.channel().is_connected(&a.address()).await);

    let mut decrypted = c.node.subscribe_decrypted();
    let mut relay_decrypted = b.node.subscribe_decrypted();
    b.transport.clear().await;

    a.node
        .send_encrypted(&c.address(), json!("for C only"))
        .await
        .unwrap();

    let message = recv_event(&mut decrypted).await;
    assert_eq!(message.message, json!("for C only"));
    assert_eq!(message.source.hops(), [a.address(), b.address()]);

    for call in b.transport.outgoing().await {
        let envelope = match call {
            starwave_core::relay::Outgoing::Broadcast { envelope, .. }
            | starwave_core::relay::Outgoing::Send { envelope, .. } => envelope,
        };
        assert_eq!(envelope.kind(), EnvelopeKind::Encrypted);
        assert!(!envelope.to_json().unwrap().contains("for C only"));
    }
    assert!(stays_quiet(&mut relay_decrypted).await);
}

#[tokio::test]
async fn reconnect_replaces_secret() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    link_line(&network, &[&a, &b]).await;

    let first = a
        .node
        .connect(&b.address())
        .await
        .unwrap()
        .wait(EVENT_TIMEOUT)
        .await
        .unwrap();
    let second = a
        .node
        .connect(&b.address())
        .await
        .unwrap()
        .wait(EVENT_TIMEOUT)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(
        Some(second),
        b.node.channel().shared_secret(&a.address()).await
    );
}

#[tokio::test]
async fn unreachable_peer_times_out() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;

    let handle = a.node.connect(&b.address()).await.unwrap();
    let result = handle.wait(Duration::from_millis(100)).await;

    assert!(matches!(result, Err(ChannelError::HandshakeTimeout(_))));
    assert_eq!(
        a.node.channel().state(&b.address()).await,
        ChannelState::HandshakeSent
    );
    assert!(a.node.channel().cancel(&b.address()).await);
    assert_eq!(
        a.node.channel().state(&b.address()).await,
        ChannelState::Disconnected
    );
}

#[tokio::test]
async fn send_without_channel_is_not_connected() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    link_line(&network, &[&a, &b]).await;

    let result = a.node.send_encrypted(&b.address(), json!("hi")).await;
    assert!(matches!(
        result,
        Err(NodeError::Channel(ChannelError::NotConnected(_)))
    ));
}

#[tokio::test]
async fn responder_rejects_undersized_prime() {
    let network = MemoryNetwork::new();
    let a = spawn_node(&network, 1).await;
    let b = spawn_node_with(&network, 2, test_config().with_min_dh_prime_bits(1024), DhGroup::default()).await;
    link_line(&network, &[&a, &b]).await;

    let handle = a.node.connect(&b.address()).await.unwrap();
    let result = handle.wait(Duration::from_millis(300)).await;

    assert!(matches!(result, Err(ChannelError::HandshakeTimeout(_))));
    assert!(!b.node.channel().is_connected(&a.address()).await);
}

#[tokio::test]
async fn default_group_handshake_converges() {
    let network = MemoryNetwork::new();
    let a = spawn_node_with(&network, 1, test_config(), DhGroup::default()).await;
    let b = spawn_node_with(&network, 2, test_config(), DhGroup::default()).await;
    link_line(&network, &[&a, &b]).await;

    let secret = a
        .node
        .connect(&b.address())
        .await
        .unwrap()
        .wait(Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(secret.as_bytes().len(), 256);
    assert_eq!(Some(secret), b.node.channel().shared_secret(&a.address()).await);
}
