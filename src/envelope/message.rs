//! The [`Envelope`] type.

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::{EnvelopeError, EnvelopeResult};
use super::types::{
    EncryptedPayload, EnvelopeKind, Payload, WireEnvelope, DEFAULT_PROTOCOL_VERSION,
};
use crate::clock::{duration_millis, now_millis};
use crate::identity::{verify_signature, NodeKeypair};

/// A signed, addressed, routable message.
///
/// `from`, `to`, `protocol_version`, `timestamp` and the payload are fixed at
/// construction and covered by the signature. `hops` and `expected_route`
/// are routing metadata updated by relays.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use starwave_core::envelope::Envelope;
/// use starwave_core::identity::NodeKeypair;
///
/// let alice = NodeKeypair::generate();
/// let bob = NodeKeypair::generate();
///
/// let mut envelope = Envelope::plain(alice.address(), bob.address(), json!("hi")).unwrap();
/// envelope.sign(&alice).unwrap();
/// assert!(envelope.verify_signature().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Payload,
    signature: Option<String>,
    from: String,
    to: String,
    protocol_version: u32,
    timestamp: i64,
    hops: Vec<String>,
    expected_route: Vec<String>,
}

impl Envelope {
    /// Creates an unsigned envelope stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidMessage`] if `from` or `to` is empty.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Payload,
    ) -> EnvelopeResult<Self> {
        let from = from.into();
        let to = to.into();
        if from.is_empty() {
            return Err(EnvelopeError::InvalidMessage("missing from".to_string()));
        }
        if to.is_empty() {
            return Err(EnvelopeError::InvalidMessage("missing to".to_string()));
        }

        Ok(Self {
            payload,
            signature: None,
            from,
            to,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            timestamp: now_millis(),
            hops: Vec::new(),
            expected_route: Vec::new(),
        })
    }

    /// Creates an unsigned plain envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidMessage`] if `from` or `to` is empty.
    pub fn plain(from: impl Into<String>, to: impl Into<String>, body: Value) -> EnvelopeResult<Self> {
        Self::new(from, to, Payload::Plain(body))
    }

    /// Overrides the creation timestamp (milliseconds since the Unix epoch).
    ///
    /// Any existing signature is discarded.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self.signature = None;
        self
    }

    /// Overrides the protocol version.
    ///
    /// Any existing signature is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidProtocolVersion`] for version 0.
    pub fn with_protocol_version(mut self, version: u32) -> EnvelopeResult<Self> {
        if version == 0 {
            return Err(EnvelopeError::InvalidProtocolVersion("0".to_string()));
        }
        self.protocol_version = version;
        self.signature = None;
        Ok(self)
    }

    /// Returns the envelope kind.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replaces the payload, discarding the signature.
    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
        self.signature = None;
    }

    /// Returns the hex signature, if the envelope has been signed.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Returns the sender address.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Returns the recipient address.
    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Returns the protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns the creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the hops recorded so far.
    #[must_use]
    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    /// Returns the expected route (empty when unknown).
    #[must_use]
    pub fn expected_route(&self) -> &[String] {
        &self.expected_route
    }

    // ==================== Hashing and signing ====================

    /// Builds the canonical string the hash is computed over.
    fn hash_input(&self) -> EnvelopeResult<String> {
        Ok(format!(
            "{}-{}-{}-{}-{}",
            self.payload.canonical_json()?,
            self.from,
            self.to,
            self.protocol_version,
            self.timestamp
        ))
    }

    /// Returns the SHA-256 digest of the canonical string.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn digest(&self) -> EnvelopeResult<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_input()?.as_bytes());
        Ok(hasher.finalize().into())
    }

    /// Returns the envelope hash as lowercase hex.
    ///
    /// The hash doubles as the envelope id used for deduplication.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn id(&self) -> EnvelopeResult<String> {
        Ok(hex::encode(self.digest()?))
    }

    /// Signs the envelope hash with `keypair`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Signing`] if the keypair's address is not
    /// `from` or signing fails.
    pub fn sign(&mut self, keypair: &NodeKeypair) -> EnvelopeResult<()> {
        if keypair.address() != self.from {
            return Err(EnvelopeError::Signing(format!(
                "signer {} is not the sender {}",
                keypair.address(),
                self.from
            )));
        }
        let digest = self.digest()?;
        self.signature = Some(keypair.sign(&digest)?);
        Ok(())
    }

    /// Verifies that the signature over the hash was made by `from`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidSignature`] if the signature is missing
    /// or does not verify.
    pub fn verify_signature(&self) -> EnvelopeResult<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or(EnvelopeError::InvalidSignature)?;
        let digest = self.digest()?;
        verify_signature(&self.from, &digest, signature).map_err(|_| EnvelopeError::InvalidSignature)
    }

    // ==================== Expiry ====================

    /// Returns true if the envelope is older than `ttl`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(now_millis(), ttl)
    }

    /// Returns true if the envelope is older than `ttl` at time `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64, ttl: Duration) -> bool {
        self.timestamp < now.saturating_sub(duration_millis(ttl))
    }

    /// Returns true if the envelope is dated more than `skew` after `now`.
    #[must_use]
    pub fn is_future_dated_at(&self, now: i64, skew: Duration) -> bool {
        self.timestamp > now.saturating_add(duration_millis(skew))
    }

    /// Returns the instant (milliseconds) after which the envelope expires.
    #[must_use]
    pub fn expires_at(&self, ttl: Duration) -> i64 {
        self.timestamp.saturating_add(duration_millis(ttl))
    }

    // ==================== Hops ====================

    /// Returns true if `address` is already recorded as a hop.
    #[must_use]
    pub fn has_hop(&self, address: &str) -> bool {
        self.hops.iter().any(|hop| hop == address)
    }

    /// Records `address` as the latest hop.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MaxHopsExceeded`] when `max_hops` hops are
    /// already recorded and [`EnvelopeError::DuplicateHop`] when the address
    /// is already present.
    pub fn add_hop(&mut self, address: &str, max_hops: usize) -> EnvelopeResult<()> {
        if self.hops.len() >= max_hops {
            return Err(EnvelopeError::MaxHopsExceeded { max: max_hops });
        }
        if self.has_hop(address) {
            return Err(EnvelopeError::DuplicateHop(address.to_string()));
        }
        self.hops.push(address.to_string());
        Ok(())
    }

    // ==================== Expected route ====================

    /// Returns true if `address` is part of the expected route.
    #[must_use]
    pub fn has_expected_route(&self, address: &str) -> bool {
        self.expected_route.iter().any(|hop| hop == address)
    }

    /// Returns the address following `current` on the expected route.
    ///
    /// Returns `None` if `current` is not on the route or is its last entry.
    #[must_use]
    pub fn next_expected_route(&self, current: &str) -> Option<&str> {
        let position = self.expected_route.iter().position(|hop| hop == current)?;
        self.expected_route.get(position + 1).map(String::as_str)
    }

    /// Forgets the expected route.
    pub fn clear_expected_route(&mut self) {
        self.expected_route.clear();
    }

    /// Replaces the expected route.
    pub fn update_expected_route(&mut self, route: Vec<String>) {
        self.expected_route = route;
    }

    // ==================== Wire format ====================

    /// Converts to the wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn to_wire(&self) -> EnvelopeResult<WireEnvelope> {
        Ok(WireEnvelope {
            kind: Some(self.kind().tag().to_string()),
            message: self.payload.to_value()?,
            signature: self.signature.clone(),
            from: Some(self.from.clone()),
            to: Some(self.to.clone()),
            protocol_version: Some(Value::from(self.protocol_version)),
            timestamp: Some(self.timestamp),
            hops: self.hops.clone(),
            expected_route: self.expected_route.clone(),
        })
    }

    /// Serializes to JSON bytes for transmission.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> EnvelopeResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_wire()?)?)
    }

    /// Serializes to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> EnvelopeResult<String> {
        Ok(serde_json::to_string(&self.to_wire()?)?)
    }

    /// Decodes and validates an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        Self::try_from(wire)
    }

    /// Decodes and validates an envelope from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid envelope.
    pub fn from_json(json: &str) -> EnvelopeResult<Self> {
        Self::from_bytes(json.as_bytes())
    }
}

/// Parses the wire `protocolVersion`, defaulting to 1 when absent.
fn parse_protocol_version(raw: Option<&Value>) -> EnvelopeResult<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_PROTOCOL_VERSION);
    };

    let parsed = match raw {
        Value::Null => return Ok(DEFAULT_PROTOCOL_VERSION),
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .filter(|version| *version > 0)
        .and_then(|version| u32::try_from(version).ok())
        .ok_or_else(|| EnvelopeError::InvalidProtocolVersion(raw.to_string()))
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> EnvelopeResult<Self> {
        let kind = EnvelopeKind::from_tag(wire.kind.as_deref().unwrap_or_default())?;

        let from = wire.from.filter(|from| !from.is_empty()).ok_or_else(|| {
            EnvelopeError::InvalidMessage("missing from".to_string())
        })?;
        let to = wire
            .to
            .filter(|to| !to.is_empty())
            .ok_or_else(|| EnvelopeError::InvalidMessage("missing to".to_string()))?;

        let protocol_version = parse_protocol_version(wire.protocol_version.as_ref())?;

        let payload = match kind {
            EnvelopeKind::Plain => Payload::Plain(wire.message),
            EnvelopeKind::Encrypted => {
                let encrypted: EncryptedPayload =
                    serde_json::from_value(wire.message).map_err(|e| {
                        EnvelopeError::InvalidMessage(format!("encrypted payload: {e}"))
                    })?;
                Payload::Encrypted(encrypted)
            }
        };

        let mut hops: Vec<String> = Vec::with_capacity(wire.hops.len());
        for hop in wire.hops {
            if hops.contains(&hop) {
                return Err(EnvelopeError::DuplicateHop(hop));
            }
            hops.push(hop);
        }

        Ok(Self {
            payload,
            signature: wire.signature.filter(|sig| !sig.is_empty()),
            from,
            to,
            protocol_version,
            timestamp: wire.timestamp.unwrap_or_else(now_millis),
            hops,
            expected_route: wire.expected_route,
        })
    }
}
