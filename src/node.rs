//! Node bootstrap facade.
//!
//! [`Node`] wires an identity, a [`NodeConfig`], the relay engine and the
//! secure channel together, and exposes the operations an embedding
//! application needs: registering transports, creating and sending
//! envelopes, opening encrypted channels and querying routes.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::{ChannelError, DecryptedMessage, DhGroup, HandshakeHandle, SecureChannel};
use crate::config::NodeConfig;
use crate::envelope::{Envelope, EnvelopeError};
use crate::identity::{IdentityError, NodeKeypair};
use crate::relay::{RelayEngine, RelayError, Transport};

/// Errors surfaced by the node facade.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Identity error.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Envelope error.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Relay error.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Secure channel error.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// A relay node.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use starwave_core::{Node, config::NodeConfig, identity::NodeKeypair};
///
/// let node = Node::new(NodeKeypair::generate(), NodeConfig::default());
/// node.register_transport(Arc::new(my_websocket_transport)).await;
/// node.start().await?;
///
/// let envelope = node.create_message(peer_address, serde_json::json!({"hello": "world"}))?;
/// node.broadcast_message(envelope).await?;
/// ```
pub struct Node {
    keypair: Arc<NodeKeypair>,
    relay: Arc<RelayEngine>,
    channel: Arc<SecureChannel>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Creates a node that is not yet started.
    #[must_use]
    pub fn new(keypair: NodeKeypair, config: NodeConfig) -> Self {
        Self::with_group(keypair, config, DhGroup::default())
    }

    /// Creates a node whose secure channel offers `group` in handshakes.
    #[must_use]
    pub fn with_group(keypair: NodeKeypair, config: NodeConfig, group: DhGroup) -> Self {
        let keypair = Arc::new(keypair);
        let relay = Arc::new(RelayEngine::new(keypair.address(), config));
        let channel = Arc::new(SecureChannel::with_group(
            Arc::clone(&keypair),
            Arc::clone(&relay),
            group,
        ));

        Self {
            keypair,
            relay,
            channel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Creates a node from a hex-encoded secret key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid.
    pub fn from_secret_hex(secret_hex: &str, config: NodeConfig) -> NodeResult<Self> {
        Ok(Self::new(NodeKeypair::from_secret_hex(secret_hex)?, config))
    }

    /// Returns the node address.
    #[must_use]
    pub fn address(&self) -> String {
        self.keypair.address()
    }

    /// Returns the node configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        self.relay.config()
    }

    /// Returns the relay engine.
    #[must_use]
    pub const fn relay(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Returns the secure channel negotiator.
    #[must_use]
    pub const fn channel(&self) -> &Arc<SecureChannel> {
        &self.channel
    }

    /// Adds a transport. Call before [`start`](Self::start) to have it
    /// initialized with the others.
    pub async fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.relay.register_transport(transport).await;
    }

    /// Starts the secure channel listener and the relay engine.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyStarted`] if the node is already running.
    pub async fn start(&self) -> NodeResult<()> {
        if self.relay.is_started().await {
            return Err(RelayError::AlreadyStarted.into());
        }

        // Listener first so no delivery slips past the channel.
        let listener = self.channel.spawn_listener();
        let pump = match self.relay.start().await {
            Ok(pump) => pump,
            Err(e) => {
                listener.abort();
                return Err(e.into());
            }
        };

        self.tasks.lock().await.extend([listener, pump]);
        info!(address = %self.address(), "Node started");
        Ok(())
    }

    /// Stops the background tasks.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!(address = %self.address(), "Node stopped");
    }

    // ==================== Messages ====================

    /// Creates a plain envelope from this node to `to`, signed and stamped
    /// with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if `to` is empty or signing fails.
    pub fn create_message(&self, to: &str, body: Value) -> NodeResult<Envelope> {
        let mut envelope = Envelope::plain(self.address(), to, body)?;
        envelope.sign(&self.keypair)?;
        Ok(envelope)
    }

    /// Sends an envelope into the network. See
    /// [`RelayEngine::broadcast_message`].
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be relayed.
    pub async fn broadcast_message(&self, envelope: Envelope) -> NodeResult<()> {
        Ok(self.relay.broadcast_message(envelope).await?)
    }

    /// Sends an envelope directly to a connected peer. See
    /// [`RelayEngine::send_message`].
    pub async fn send_message(&self, address: &str, envelope: &Envelope) -> bool {
        self.relay.send_message(address, envelope).await
    }

    /// Subscribes to envelopes delivered to this node.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.relay.subscribe()
    }

    // ==================== Secure channels ====================

    /// Starts a secure channel handshake with `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be sent.
    pub async fn connect(&self, address: &str) -> NodeResult<HandshakeHandle> {
        Ok(self.channel.connect(address).await?)
    }

    /// Encrypts `body` for `to` and sends it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] if no channel exists.
    pub async fn send_encrypted(&self, to: &str, body: Value) -> NodeResult<Envelope> {
        Ok(self.channel.send_to(to, body).await?)
    }

    /// Subscribes to decrypted messages.
    #[must_use]
    pub fn subscribe_decrypted(&self) -> broadcast::Receiver<DecryptedMessage> {
        self.channel.subscribe()
    }

    // ==================== Routes ====================

    /// Returns a shortest known path from this node to `address`.
    pub async fn routes_to(&self, address: &str) -> Vec<String> {
        self.routes_between(&self.address(), address).await
    }

    /// Returns a shortest known path between two addresses.
    pub async fn routes_between(&self, from: &str, to: &str) -> Vec<String> {
        self.relay
            .routing()
            .read()
            .await
            .find_shortest_routes(from, to)
    }
}
