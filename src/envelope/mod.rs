//! Signed message envelopes.
//!
//! An [`Envelope`] is the unit the relay moves between nodes. It comes in a
//! plain and an encrypted variant, distinguished on the wire by the `type`
//! tag (`"u"` / `"e"`), and both share one hashing and signing path.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "type": "u",
//!   "message": {"text": "hello"},
//!   "signature": "...",          // Schnorr signature over the hash, hex
//!   "from": "...",               // sender address
//!   "to": "...",                 // recipient address
//!   "protocolVersion": 1,
//!   "timestamp": 1700000000000,  // milliseconds
//!   "hops": ["..."],
//!   "expectedRoute": ["...", "..."]
//! }
//! ```
//!
//! The hash covers payload, `from`, `to`, `protocolVersion` and `timestamp`.
//! `hops` and `expectedRoute` are left out so relays can update them without
//! invalidating the signature.

mod error;
mod message;
mod types;

pub use error::{EnvelopeError, EnvelopeResult};
pub use message::Envelope;
pub use types::{
    EncryptedPayload, EnvelopeKind, Payload, WireEnvelope, DEFAULT_PROTOCOL_VERSION,
};
