//! The [`SecureChannel`] negotiator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cipher::{decrypt_value, encrypt_value};
use super::dh::{DhGroup, DhKeypair, SharedSecret};
use super::error::{ChannelError, ChannelResult};
use super::types::{
    ChannelState, DecryptedMessage, DhOffer, DhReply, HandshakeData, HandshakeMessage,
    HandshakeResponseData,
};
use crate::envelope::{Envelope, Payload};
use crate::identity::NodeKeypair;
use crate::relay::RelayEngine;

/// A handshake awaiting the peer's response.
struct PendingHandshake {
    keypair: DhKeypair,
    resolver: oneshot::Sender<SharedSecret>,
}

/// Resolves with the shared secret once the peer answers a handshake.
#[derive(Debug)]
pub struct HandshakeHandle {
    address: String,
    receiver: oneshot::Receiver<SharedSecret>,
}

impl HandshakeHandle {
    /// Returns the peer address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits up to `timeout` for the handshake to complete.
    ///
    /// A timed-out handshake stays pending until the response arrives,
    /// [`SecureChannel::cancel`] is called, or a new `connect` replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::HandshakeTimeout`] when the timeout elapses and
    /// [`ChannelError::HandshakeCancelled`] when the handshake was cancelled
    /// or superseded.
    pub async fn wait(self, timeout: Duration) -> ChannelResult<SharedSecret> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(secret)) => Ok(secret),
            Ok(Err(_)) => Err(ChannelError::HandshakeCancelled(self.address)),
            Err(_) => Err(ChannelError::HandshakeTimeout(self.address)),
        }
    }
}

/// Negotiates and uses pairwise encrypted channels.
///
/// Secrets and pending handshakes are keyed by peer address. The channel
/// sends through the relay engine and learns about inbound handshakes and
/// ciphertext from the engine's delivery events (see
/// [`spawn_listener`](Self::spawn_listener)).
pub struct SecureChannel {
    keypair: Arc<NodeKeypair>,
    address: String,
    relay: Arc<RelayEngine>,

    /// Group offered by [`connect`](Self::connect).
    group: DhGroup,

    /// Smallest prime accepted from a peer's offer.
    min_prime_bits: u64,

    /// Largest prime accepted from a peer's offer.
    max_prime_bits: u64,

    secrets: RwLock<HashMap<String, SharedSecret>>,
    pending: Mutex<HashMap<String, PendingHandshake>>,
    events: broadcast::Sender<DecryptedMessage>,
}

impl SecureChannel {
    /// Creates a channel negotiator that signs with `keypair` and sends
    /// through `relay`.
    #[must_use]
    pub fn new(keypair: Arc<NodeKeypair>, relay: Arc<RelayEngine>) -> Self {
        Self::with_group(keypair, relay, DhGroup::default())
    }

    /// Creates a channel negotiator that offers `group` in its handshakes.
    #[must_use]
    pub fn with_group(keypair: Arc<NodeKeypair>, relay: Arc<RelayEngine>, group: DhGroup) -> Self {
        let config = relay.config();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let min_prime_bits = config.min_dh_prime_bits;
        let max_prime_bits = config.max_dh_prime_bits;

        Self {
            address: keypair.address(),
            keypair,
            relay,
            group,
            min_prime_bits,
            max_prime_bits,
            secrets: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Returns the local address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Subscribes to decrypted messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecryptedMessage> {
        self.events.subscribe()
    }

    /// Returns the negotiation state for `address`.
    pub async fn state(&self, address: &str) -> ChannelState {
        if self.secrets.read().await.contains_key(address) {
            ChannelState::Established
        } else if self.pending.lock().await.contains_key(address) {
            ChannelState::HandshakeSent
        } else {
            ChannelState::Disconnected
        }
    }

    /// Returns true if a shared secret exists for `address`.
    pub async fn is_connected(&self, address: &str) -> bool {
        self.secrets.read().await.contains_key(address)
    }

    /// Returns the shared secret for `address`, if any.
    pub async fn shared_secret(&self, address: &str) -> Option<SharedSecret> {
        self.secrets.read().await.get(address).cloned()
    }

    // ==================== Handshake ====================

    /// Starts a handshake with `address`.
    ///
    /// Any existing secret for the peer is discarded and any pending
    /// handshake is superseded; its handle resolves with
    /// [`ChannelError::HandshakeCancelled`].
    ///
    /// If the peer connects to this node at the same time, the offer from
    /// the lower address wins: the higher side answers it and resolves its
    /// own handle with the resulting secret. An offer delivered after the
    /// response to the winning offer is treated as a fresh reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake envelope cannot be built, signed or
    /// handed to the relay.
    pub async fn connect(&self, address: &str) -> ChannelResult<HandshakeHandle> {
        info!(peer = %address, "Connecting secure channel");
        self.secrets.write().await.remove(address);

        let keypair = self.group.generate_keypair();
        let handshake = HandshakeMessage::Handshake(HandshakeData {
            address: self.address.clone(),
            dh: DhOffer {
                prime: self.group.prime_hex(),
                generator: self.group.generator_hex(),
                public_key: keypair.public_hex(),
            },
        });
        let envelope = self.signed_envelope(address, Value::String(handshake.to_json()?))?;

        let (resolver, receiver) = oneshot::channel();
        if self
            .pending
            .lock()
            .await
            .insert(address.to_string(), PendingHandshake { keypair, resolver })
            .is_some()
        {
            debug!(peer = %address, "Pending handshake superseded");
        }

        if let Err(e) = self.relay.broadcast_message(envelope).await {
            self.pending.lock().await.remove(address);
            return Err(e.into());
        }

        Ok(HandshakeHandle {
            address: address.to_string(),
            receiver,
        })
    }

    /// Cancels a pending handshake.
    ///
    /// Returns true if one was pending.
    pub async fn cancel(&self, address: &str) -> bool {
        self.pending.lock().await.remove(address).is_some()
    }

    /// Answers a handshake offer from `from`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidHandshake`] if the offer's address does
    /// not match the sender, the prime is outside the accepted size range or
    /// not prime, or the public value is out of range.
    pub async fn process_handshake(&self, from: &str, data: &HandshakeData) -> ChannelResult<()> {
        if data.address != from {
            return Err(ChannelError::InvalidHandshake(format!(
                "address {} does not match sender {from}",
                data.address
            )));
        }

        // Hex length bounds the prime before anything is parsed
        let max_hex_len = usize::try_from(self.max_prime_bits.div_ceil(4)).unwrap_or(usize::MAX);
        if data.dh.prime.trim().trim_start_matches('0').len() > max_hex_len {
            return Err(ChannelError::InvalidHandshake(format!(
                "prime exceeds the {} bit maximum",
                self.max_prime_bits
            )));
        }

        let group = DhGroup::from_hex(&data.dh.prime, &data.dh.generator)?;
        if group.bits() < self.min_prime_bits || group.bits() > self.max_prime_bits {
            return Err(ChannelError::InvalidHandshake(format!(
                "prime of {} bits is outside {}..={} bits",
                group.bits(),
                self.min_prime_bits,
                self.max_prime_bits
            )));
        }
        if !group.has_probable_prime() {
            return Err(ChannelError::InvalidHandshake(
                "modulus is not prime".to_string(),
            ));
        }

        if self.address.as_str() < from && self.pending.lock().await.contains_key(from) {
            debug!(peer = %from, "Simultaneous handshake, keeping own offer");
            return Ok(());
        }

        let keypair = group.generate_keypair();
        let secret = keypair.compute_secret(&data.dh.public_key)?;
        self.secrets
            .write()
            .await
            .insert(from.to_string(), secret.clone());

        if let Some(pending) = self.pending.lock().await.remove(from) {
            debug!(peer = %from, "Simultaneous handshake, answering peer offer");
            if pending.resolver.send(secret).is_err() {
                debug!(peer = %from, "Handshake handle dropped before completion");
            }
        }

        let response = HandshakeMessage::HandshakeResponse(HandshakeResponseData {
            address: self.address.clone(),
            dh: DhReply {
                public_key: keypair.public_hex(),
            },
        });
        let envelope = self.signed_envelope(from, Value::String(response.to_json()?))?;
        self.relay.broadcast_message(envelope).await?;

        info!(peer = %from, "Secure channel established (responder)");
        Ok(())
    }

    /// Completes a handshake this node started.
    ///
    /// A response with no pending handshake is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidHandshake`] if the response's address
    /// does not match the sender or its public value is out of range.
    pub async fn process_handshake_response(
        &self,
        from: &str,
        data: &HandshakeResponseData,
    ) -> ChannelResult<()> {
        if data.address != from {
            return Err(ChannelError::InvalidHandshake(format!(
                "address {} does not match sender {from}",
                data.address
            )));
        }

        let Some(pending) = self.pending.lock().await.remove(from) else {
            debug!(peer = %from, "Handshake response without pending handshake");
            return Ok(());
        };

        let secret = pending.keypair.compute_secret(&data.dh.public_key)?;
        self.secrets
            .write()
            .await
            .insert(from.to_string(), secret.clone());

        if pending.resolver.send(secret).is_err() {
            debug!(peer = %from, "Handshake handle dropped before completion");
        }
        info!(peer = %from, "Secure channel established (initiator)");
        Ok(())
    }

    // ==================== Messaging ====================

    /// Encrypts the envelope's plain payload for its recipient, signs it and
    /// hands it to the relay.
    ///
    /// Returns the envelope as sent.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] if no secret exists for the
    /// recipient, and [`ChannelError::Encryption`] if the payload is already
    /// encrypted.
    pub async fn send_encrypted(&self, mut envelope: Envelope) -> ChannelResult<Envelope> {
        let secret = self
            .shared_secret(envelope.to())
            .await
            .ok_or_else(|| ChannelError::NotConnected(envelope.to().to_string()))?;

        let Some(body) = envelope.payload().as_plain() else {
            return Err(ChannelError::Encryption(
                "payload is already encrypted".to_string(),
            ));
        };
        let encrypted = encrypt_value(body, &secret.encryption_key())?;

        envelope.set_payload(Payload::Encrypted(encrypted));
        envelope.sign(&self.keypair)?;
        self.relay.broadcast_message(envelope.clone()).await?;
        Ok(envelope)
    }

    /// Encrypts `body` for `to` and sends it.
    ///
    /// # Errors
    ///
    /// See [`send_encrypted`](Self::send_encrypted).
    pub async fn send_to(&self, to: &str, body: Value) -> ChannelResult<Envelope> {
        let envelope = Envelope::plain(self.address.clone(), to, body)?;
        self.send_encrypted(envelope).await
    }

    /// Handles an envelope delivered to this node.
    ///
    /// Encrypted payloads are decrypted and emitted; plain payloads carrying
    /// a handshake are processed. Envelopes for other addresses and ordinary
    /// plain payloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] for ciphertext from an unknown
    /// peer, and any handshake or decryption failure.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> ChannelResult<()> {
        if envelope.to() != self.address {
            return Ok(());
        }
        let from = envelope.from();

        match envelope.payload() {
            Payload::Encrypted(encrypted) => {
                let secret = self
                    .shared_secret(from)
                    .await
                    .ok_or_else(|| ChannelError::NotConnected(from.to_string()))?;
                let message = decrypt_value(encrypted, &secret.encryption_key())?;

                debug!(peer = %from, "Encrypted message received");
                if self
                    .events
                    .send(DecryptedMessage {
                        from: from.to_string(),
                        message,
                        source: envelope.clone(),
                    })
                    .is_err()
                {
                    debug!(peer = %from, "No decrypted message subscribers");
                }
                Ok(())
            }
            Payload::Plain(value) => match HandshakeMessage::from_value(value) {
                Some(HandshakeMessage::Handshake(data)) => self.process_handshake(from, &data).await,
                Some(HandshakeMessage::HandshakeResponse(data)) => {
                    self.process_handshake_response(from, &data).await
                }
                None => Ok(()),
            },
        }
    }

    /// Spawns a task that feeds the relay's deliveries into
    /// [`handle_envelope`](Self::handle_envelope).
    ///
    /// The subscription is taken before this returns, so no delivery made
    /// afterwards is missed.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut deliveries = self.relay.subscribe();
        let channel = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match deliveries.recv().await {
                    Ok(envelope) => {
                        if let Err(e) = channel.handle_envelope(&envelope).await {
                            warn!(from = %envelope.from(), error = %e, "Secure channel message dropped");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Secure channel listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Secure channel listener stopped");
        })
    }

    fn signed_envelope(&self, to: &str, body: Value) -> ChannelResult<Envelope> {
        let mut envelope = Envelope::plain(self.address.clone(), to, body)?;
        envelope.sign(&self.keypair)?;
        Ok(envelope)
    }
}
