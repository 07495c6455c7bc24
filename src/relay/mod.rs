//! Relay engine: envelope processing, flooding and route repair.
//!
//! Every node runs one [`RelayEngine`]. Transports push inbound frames into
//! a shared queue; a single pump task drains it and runs each frame through
//! the processing pipeline:
//!
//! ```text
//! Transport ──► InboundFrame ──► decode ──► expired? ──► future? ──► duplicate?
//!                                                                     │
//!                  ┌──────────── verify ◄─────────────────────────────┘
//!                  ▼
//!             self-loop? ──► learn path ──► to == local? ──► deliver
//!                                                │
//!                                                ▼
//!                                     flood / forward / repair
//! ```
//!
//! # Relay Decisions
//!
//! | Expected route | Action |
//! |----------------|--------|
//! | empty | Flood to every transport except toward the origin peer |
//! | contains local with a successor | Forward to the successor |
//! | anything else | Repair from the routing table, or flood if no path |
//!
//! Every relayed envelope records the local address as its latest hop.
//!
//! # Transports
//!
//! Transports implement [`Transport`] and are registered with the engine
//! before [`RelayEngine::start`]. A transport whose initialization fails is
//! logged and excluded; the remaining transports keep working.

mod dedup;
mod engine;
mod error;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod transport;
mod types;

pub use dedup::DedupCache;
pub use engine::RelayEngine;
pub use error::{RelayError, RelayResult};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryNetwork, MemoryTransport, Outgoing};
pub use transport::{Transport, TransportError, TransportResult};
pub use types::{InboundFrame, RelayAction};
