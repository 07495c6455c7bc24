//! Error types for envelope construction, signing and mutation.

use thiserror::Error;

use crate::identity::IdentityError;

/// Errors raised by [`Envelope`](super::Envelope) operations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A required field is missing or malformed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// `protocolVersion` is not a positive integer.
    #[error("Invalid protocol version: {0}")]
    InvalidProtocolVersion(String),

    /// The signature is missing or does not verify for `from`.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The hop list is already at the configured ceiling.
    #[error("Maximum hop count of {max} exceeded")]
    MaxHopsExceeded {
        /// The configured ceiling.
        max: usize,
    },

    /// The address already appears in the hop list.
    #[error("Duplicate hop: {0}")]
    DuplicateHop(String),

    /// The `type` tag is not a known envelope kind.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Signing the envelope hash failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

impl From<IdentityError> for EnvelopeError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidSignature | IdentityError::InvalidAddress(_) => {
                Self::InvalidSignature
            }
            IdentityError::KeyDerivation(msg) | IdentityError::Signing(msg) => Self::Signing(msg),
        }
    }
}
