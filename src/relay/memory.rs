//! In-process transport for tests and simulations.
//!
//! A [`MemoryNetwork`] connects any number of [`MemoryTransport`]s through
//! explicit symmetric links. Each transport records what it was asked to
//! send so tests can assert on flood exclusion and forwarding decisions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::transport::{Transport, TransportError, TransportResult};
use super::types::InboundFrame;
use crate::envelope::Envelope;

#[derive(Debug, Default)]
struct NetworkState {
    sinks: HashMap<String, mpsc::Sender<InboundFrame>>,
    links: HashMap<String, HashSet<String>>,
}

/// A set of in-memory links between node addresses.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport for the node at `address`.
    #[must_use]
    pub fn transport(&self, address: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            address: address.into(),
            network: self.clone(),
            fail_init: false,
            outgoing: Mutex::new(Vec::new()),
        }
    }

    /// Creates a transport whose initialization always fails.
    #[must_use]
    pub fn failing_transport(&self, address: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            fail_init: true,
            ..self.transport(address)
        }
    }

    /// Connects `a` and `b` in both directions.
    pub async fn link(&self, a: &str, b: &str) {
        let mut state = self.state.lock().await;
        state.links.entry(a.to_string()).or_default().insert(b.to_string());
        state.links.entry(b.to_string()).or_default().insert(a.to_string());
    }

    /// Removes the link between `a` and `b`.
    pub async fn unlink(&self, a: &str, b: &str) {
        let mut state = self.state.lock().await;
        if let Some(peers) = state.links.get_mut(a) {
            peers.remove(b);
        }
        if let Some(peers) = state.links.get_mut(b) {
            peers.remove(a);
        }
    }

    /// Returns true if `a` and `b` are linked.
    pub async fn is_linked(&self, a: &str, b: &str) -> bool {
        let state = self.state.lock().await;
        state.links.get(a).is_some_and(|peers| peers.contains(b))
    }

    async fn register(&self, address: &str, sink: mpsc::Sender<InboundFrame>) {
        self.state.lock().await.sinks.insert(address.to_string(), sink);
    }

    async fn peers(&self, address: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut peers: Vec<String> = state
            .links
            .get(address)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    async fn deliver(&self, from: &str, to: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let sink = self.state.lock().await.sinks.get(to).cloned();
        let Some(sink) = sink else {
            debug!(from = %from, to = %to, "Peer has no inbound sink, frame dropped");
            return Ok(());
        };
        sink.send(InboundFrame::new(bytes, Some(from.to_string())))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }
}

/// A call a [`MemoryTransport`] received from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// A flood.
    Broadcast {
        /// The envelope as handed to the transport.
        envelope: Envelope,
        /// Peers the flood had to skip.
        exclude: Vec<String>,
    },
    /// A directed send.
    Send {
        /// The target address.
        to: String,
        /// The envelope as handed to the transport.
        envelope: Envelope,
    },
}

/// Transport backed by a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
    fail_init: bool,
    outgoing: Mutex<Vec<Outgoing>>,
}

impl MemoryTransport {
    /// Returns the address this transport delivers from.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns every call recorded so far.
    pub async fn outgoing(&self) -> Vec<Outgoing> {
        self.outgoing.lock().await.clone()
    }

    /// Returns the recorded floods as `(envelope, exclude)` pairs.
    pub async fn broadcasts(&self) -> Vec<(Envelope, Vec<String>)> {
        self.outgoing
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Outgoing::Broadcast { envelope, exclude } => {
                    Some((envelope.clone(), exclude.clone()))
                }
                Outgoing::Send { .. } => None,
            })
            .collect()
    }

    /// Returns the recorded directed sends as `(to, envelope)` pairs.
    pub async fn sends(&self) -> Vec<(String, Envelope)> {
        self.outgoing
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Outgoing::Send { to, envelope } => Some((to.clone(), envelope.clone())),
                Outgoing::Broadcast { .. } => None,
            })
            .collect()
    }

    /// Forgets all recorded calls.
    pub async fn clear(&self) {
        self.outgoing.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn init(&self, inbound: mpsc::Sender<InboundFrame>) -> TransportResult<()> {
        if self.fail_init {
            return Err(TransportError::Other("simulated init failure".to_string()));
        }
        self.network.register(&self.address, inbound).await;
        Ok(())
    }

    async fn broadcast(&self, envelope: &Envelope, exclude: &[String]) -> TransportResult<()> {
        self.outgoing.lock().await.push(Outgoing::Broadcast {
            envelope: envelope.clone(),
            exclude: exclude.to_vec(),
        });

        let bytes = envelope.to_bytes()?;
        for peer in self.network.peers(&self.address).await {
            if exclude.contains(&peer) {
                continue;
            }
            self.network.deliver(&self.address, &peer, bytes.clone()).await?;
        }
        Ok(())
    }

    async fn send(&self, address: &str, envelope: &Envelope) -> TransportResult<()> {
        self.outgoing.lock().await.push(Outgoing::Send {
            to: address.to_string(),
            envelope: envelope.clone(),
        });

        if !self.network.is_linked(&self.address, address).await {
            return Err(TransportError::NoConnection(address.to_string()));
        }
        let bytes = envelope.to_bytes()?;
        self.network.deliver(&self.address, address, bytes).await
    }

    async fn has_connection(&self, address: &str) -> bool {
        self.network.is_linked(&self.address, address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::plain("aa", "cc", json!("hi")).unwrap()
    }

    #[tokio::test]
    async fn link_is_symmetric() {
        let network = MemoryNetwork::new();
        network.link("aa", "bb").await;
        assert!(network.is_linked("aa", "bb").await);
        assert!(network.is_linked("bb", "aa").await);

        network.unlink("bb", "aa").await;
        assert!(!network.is_linked("aa", "bb").await);
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_peers() {
        let network = MemoryNetwork::new();
        let a = network.transport("aa");
        let b = network.transport("bb");
        let c = network.transport("cc");
        network.link("aa", "bb").await;
        network.link("aa", "cc").await;

        let (b_tx, mut b_rx) = mpsc::channel(4);
        let (c_tx, mut c_rx) = mpsc::channel(4);
        b.init(b_tx).await.unwrap();
        c.init(c_tx).await.unwrap();

        a.broadcast(&envelope(), &["bb".to_string()]).await.unwrap();

        let frame = c_rx.recv().await.unwrap();
        assert_eq!(frame.origin.as_deref(), Some("aa"));
        assert!(b_rx.try_recv().is_err());
        assert_eq!(a.broadcasts().await.len(), 1);
    }

    #[tokio::test]
    async fn send_requires_link() {
        let network = MemoryNetwork::new();
        let a = network.transport("aa");
        let result = a.send("bb", &envelope()).await;
        assert!(matches!(result, Err(TransportError::NoConnection(_))));
        assert!(!a.has_connection("bb").await);
        assert_eq!(a.sends().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_transport_rejects_init() {
        let network = MemoryNetwork::new();
        let a = network.failing_transport("aa");
        let (tx, _rx) = mpsc::channel(1);
        assert!(a.init(tx).await.is_err());
    }

    #[tokio::test]
    async fn clear_forgets_calls() {
        let network = MemoryNetwork::new();
        let a = network.transport("aa");
        a.broadcast(&envelope(), &[]).await.unwrap();
        a.clear().await;
        assert!(a.outgoing().await.is_empty());
    }
}
