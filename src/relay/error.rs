//! Error types for relay operations.
//!
//! Most variants describe why an inbound envelope was dropped. The pump
//! logs them and moves on; none of them is fatal to the node.

use thiserror::Error;

use super::transport::TransportError;
use crate::envelope::EnvelopeError;

/// Errors that can occur while processing or relaying envelopes.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The envelope is older than the configured TTL.
    #[error("Envelope expired")]
    Expired,

    /// The envelope is dated too far ahead of the local clock.
    #[error("Envelope timestamp is in the future")]
    FutureTimestamp,

    /// The envelope id has already been processed.
    #[error("Duplicate envelope: {0}")]
    Duplicate(String),

    /// The envelope originated from this node.
    #[error("Envelope originated locally")]
    SelfLoop,

    /// The envelope failed decoding, validation or signature checks.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A transport failed to deliver the envelope.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A transport failed to initialize and was excluded.
    #[error("Transport {name} failed to initialize: {reason}")]
    ProviderInitFailure {
        /// The transport name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The engine's inbound pump is already running.
    #[error("Relay engine already started")]
    AlreadyStarted,
}

impl RelayError {
    /// Returns true if the error is an ordinary drop decision rather than a
    /// delivery failure.
    #[must_use]
    pub const fn is_drop(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::FutureTimestamp
                | Self::Duplicate(_)
                | Self::SelfLoop
                | Self::Envelope(_)
        )
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
