//! Handshake payloads and channel events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ChannelResult;
use crate::envelope::Envelope;

/// Group parameters and public value offered by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhOffer {
    /// Prime modulus, hex.
    pub prime: String,
    /// Generator, hex.
    pub generator: String,
    /// Initiator's public value, hex.
    pub public_key: String,
}

/// Public value returned by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhReply {
    /// Responder's public value, hex.
    pub public_key: String,
}

/// Body of a `handshake` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeData {
    /// Address of the initiator.
    pub address: String,
    /// The offer.
    pub dh: DhOffer,
}

/// Body of a `handshake_response` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponseData {
    /// Address of the responder.
    pub address: String,
    /// The reply.
    pub dh: DhReply,
}

/// Control messages carried in plain envelopes.
///
/// On the wire: `{"type": "handshake" | "handshake_response", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// Opens a channel.
    Handshake(HandshakeData),
    /// Completes a channel.
    HandshakeResponse(HandshakeResponseData),
}

impl HandshakeMessage {
    /// Serializes to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a handshake from an envelope payload.
    ///
    /// Accepts either the JSON object itself or a JSON string containing it.
    /// Returns `None` for anything that is not a handshake.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => serde_json::from_str(text).ok(),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

/// Negotiation state for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No handshake and no secret.
    Disconnected,
    /// A handshake was sent and the response is pending.
    HandshakeSent,
    /// A shared secret exists.
    Established,
}

/// An encrypted envelope received and decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessage {
    /// Sender address.
    pub from: String,
    /// Decrypted body.
    pub message: Value,
    /// The envelope as received.
    pub source: Envelope,
}
