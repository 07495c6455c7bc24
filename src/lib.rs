//! StarWave Core Library
//!
//! A peer-to-peer relay node: signed envelopes travel between addressable
//! nodes without a central server. Routes are learned from the paths
//! envelopes take; when no path is known envelopes are flooded, and broken
//! routes are repaired from the routing table. Pairs of nodes can negotiate
//! end-to-end encrypted channels with a Diffie-Hellman handshake carried
//! over the same relay network.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`identity`] | Node keypair, addresses and Schnorr signatures |
//! | [`envelope`] | Signed message format and wire encoding |
//! | [`routing`] | Learned adjacency and shortest-path queries |
//! | [`relay`] | Envelope processing, flooding and route repair |
//! | [`channel`] | Diffie-Hellman handshake and encrypted payloads |
//! | [`node`] | Facade wiring everything together |
//!
//! The crate logs through `tracing` and installs no subscriber.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod channel;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod identity;
pub mod node;
pub mod relay;
pub mod routing;

pub use node::{Node, NodeError, NodeResult};
