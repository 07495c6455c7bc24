//! The transport capability the relay engine sends and receives through.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::InboundFrame;
use crate::envelope::{Envelope, EnvelopeError};

/// Errors reported by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has not been initialized.
    #[error("Transport not initialized")]
    NotInitialized,

    /// There is no live connection to the address.
    #[error("No connection to {0}")]
    NoConnection(String),

    /// The envelope could not be encoded.
    #[error("Encoding failed: {0}")]
    Encoding(#[from] EnvelopeError),

    /// The underlying channel or socket is closed.
    #[error("Transport closed: {0}")]
    Closed(String),

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A way of reaching other nodes.
///
/// Implementations own their connections. Inbound traffic is pushed into
/// the sink handed over by [`init`](Self::init); outbound calls are
/// fire-and-forget from the engine's point of view.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Prepares the transport and registers the sink for inbound frames.
    async fn init(&self, inbound: mpsc::Sender<InboundFrame>) -> TransportResult<()>;

    /// Sends the envelope to every connected peer not listed in `exclude`.
    async fn broadcast(&self, envelope: &Envelope, exclude: &[String]) -> TransportResult<()>;

    /// Sends the envelope to a single connected peer.
    async fn send(&self, address: &str, envelope: &Envelope) -> TransportResult<()>;

    /// Returns true if the transport has a live connection to `address`.
    async fn has_connection(&self, address: &str) -> bool;
}
