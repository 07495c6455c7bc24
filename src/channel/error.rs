//! Error types for secure channel operations.

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::relay::RelayError;

/// Errors that can occur while negotiating or using a secure channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No shared secret exists for the peer.
    #[error("Address not connected: {0}")]
    NotConnected(String),

    /// A handshake payload failed validation.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The peer did not answer within the caller's timeout.
    #[error("Handshake with {0} timed out")]
    HandshakeTimeout(String),

    /// The pending handshake was cancelled or superseded.
    #[error("Handshake with {0} was cancelled")]
    HandshakeCancelled(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Envelope construction, signing or validation failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The relay engine refused the envelope.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A hex field could not be decoded.
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for secure channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display() {
        let error = ChannelError::NotConnected("bb".to_string());
        assert_eq!(error.to_string(), "Address not connected: bb");
    }

    #[test]
    fn invalid_handshake_display() {
        let error = ChannelError::InvalidHandshake("prime too small".to_string());
        assert_eq!(error.to_string(), "Invalid handshake: prime too small");
    }

    #[test]
    fn handshake_timeout_display() {
        let error = ChannelError::HandshakeTimeout("bb".to_string());
        assert_eq!(error.to_string(), "Handshake with bb timed out");
    }

    #[test]
    fn handshake_cancelled_display() {
        let error = ChannelError::HandshakeCancelled("bb".to_string());
        assert_eq!(error.to_string(), "Handshake with bb was cancelled");
    }

    #[test]
    fn decryption_display() {
        let error = ChannelError::Decryption("bad padding".to_string());
        assert_eq!(error.to_string(), "Decryption failed: bad padding");
    }

    #[test]
    fn hex_error_converts() {
        let hex_err = hex::decode("zz").unwrap_err();
        let error: ChannelError = hex_err.into();
        assert!(error.to_string().starts_with("Hex decode error"));
    }

    #[test]
    fn relay_error_is_transparent() {
        let error = ChannelError::from(RelayError::Expired);
        assert_eq!(error.to_string(), "Envelope expired");
    }
}
