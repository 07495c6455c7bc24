//! Types for relay processing.

/// A raw frame received by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// The encoded envelope.
    pub bytes: Vec<u8>,
    /// Address of the peer that handed the frame over, if known.
    pub origin: Option<String>,
}

impl InboundFrame {
    /// Creates a frame received from `origin`.
    #[must_use]
    pub fn new(bytes: Vec<u8>, origin: Option<String>) -> Self {
        Self { bytes, origin }
    }
}

/// What the engine did with an envelope it accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// The envelope was addressed to this node and emitted to subscribers.
    Delivered,

    /// The envelope was flooded to all transports except the origin peer.
    Flooded,

    /// The envelope followed its expected route.
    Forwarded {
        /// The next address on the route.
        next_hop: String,
    },

    /// The expected route was broken and replaced from the routing table.
    Rerouted {
        /// The next address on the new route.
        next_hop: String,
        /// The new expected route.
        route: Vec<String>,
    },
}

impl RelayAction {
    /// Returns true if the envelope left this node.
    #[must_use]
    pub const fn is_relayed(&self) -> bool {
        !matches!(self, Self::Delivered)
    }
}
