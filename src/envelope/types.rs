//! Payload and wire types for envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{EnvelopeError, EnvelopeResult};

/// Protocol version assumed when the wire field is absent.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

/// Envelope variant, carried on the wire as the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Plain payload (`"u"`).
    Plain,
    /// AES-encrypted payload (`"e"`).
    Encrypted,
}

impl EnvelopeKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Plain => "u",
            Self::Encrypted => "e",
        }
    }

    /// Parses a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownMessageType`] for any other tag.
    pub fn from_tag(tag: &str) -> EnvelopeResult<Self> {
        match tag {
            "u" => Ok(Self::Plain),
            "e" => Ok(Self::Encrypted),
            other => Err(EnvelopeError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Ciphertext of an encrypted envelope.
///
/// Both fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// 16-byte initialization vector.
    pub iv: String,
    /// AES-256-CBC ciphertext.
    pub d: String,
}

/// Envelope payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque application value.
    Plain(Value),
    /// Encrypted application value.
    Encrypted(EncryptedPayload),
}

impl Payload {
    /// Returns the envelope kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Plain(_) => EnvelopeKind::Plain,
            Self::Encrypted(_) => EnvelopeKind::Encrypted,
        }
    }

    /// Returns the payload as it appears in the `message` wire field.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn to_value(&self) -> EnvelopeResult<Value> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Encrypted(encrypted) => Ok(serde_json::to_value(encrypted)?),
        }
    }

    /// Serializes the payload into the compact form used by the envelope hash.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn canonical_json(&self) -> EnvelopeResult<String> {
        match self {
            Self::Plain(value) => Ok(serde_json::to_string(&sorted_keys(value))?),
            Self::Encrypted(encrypted) => Ok(serde_json::to_string(encrypted)?),
        }
    }

    /// Returns the plain value, if this is a plain payload.
    #[must_use]
    pub const fn as_plain(&self) -> Option<&Value> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Encrypted(_) => None,
        }
    }

    /// Returns the ciphertext, if this is an encrypted payload.
    #[must_use]
    pub const fn as_encrypted(&self) -> Option<&EncryptedPayload> {
        match self {
            Self::Plain(_) => None,
            Self::Encrypted(encrypted) => Some(encrypted),
        }
    }
}

/// Rebuilds `value` with object keys in lexicographic order at every level.
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), sorted_keys(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

/// Envelope exactly as it travels between nodes.
///
/// Every field except `type` is optional at the serde level so that
/// validation errors can be reported precisely by
/// [`Envelope::try_from`](super::Envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    /// Kind tag (`"u"` or `"e"`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Payload.
    #[serde(default)]
    pub message: Value,

    /// Hex Schnorr signature over the envelope hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Sender address.
    #[serde(default)]
    pub from: Option<String>,

    /// Recipient address.
    #[serde(default)]
    pub to: Option<String>,

    /// Protocol version; kept as raw JSON to report non-numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<Value>,

    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Addresses the envelope has traversed.
    #[serde(default)]
    pub hops: Vec<String>,

    /// Precomputed path from origin to destination.
    #[serde(default)]
    pub expected_route: Vec<String>,
}
