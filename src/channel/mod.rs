//! Pairwise encrypted channels negotiated over the relay network.
//!
//! Two nodes agree on a shared secret with a finite-field Diffie-Hellman
//! exchange carried in ordinary signed envelopes:
//!
//! ```text
//! Alice                                   Bob
//!   │  handshake {prime, generator, A}      │
//!   │ ────────────────────────────────────► │  secret = A^b mod p
//!   │                                       │
//!   │  handshake_response {B}               │
//!   │ ◄──────────────────────────────────── │
//!   │  secret = B^a mod p                   │
//! ```
//!
//! Once established, envelopes to the peer are encrypted with
//! AES-256-CBC under `SHA-256(secret)` and decrypted on arrival.
//!
//! # Security Considerations
//!
//! - Handshake envelopes are signed by their sender, and the address inside
//!   the handshake must match the signer.
//! - The cipher has no integrity tag beyond the envelope signature. A
//!   corrupted ciphertext may decrypt to garbage or fail unpadding.
//! - Ephemeral DH keypairs are discarded once the secret is computed.

mod cipher;
mod dh;
mod error;
mod negotiator;
mod types;

pub use cipher::{decrypt_payload, decrypt_value, encrypt_payload, encrypt_value};
pub use dh::{DhGroup, DhKeypair, SharedSecret, RFC3526_GROUP14_PRIME_HEX};
pub use error::{ChannelError, ChannelResult};
pub use negotiator::{HandshakeHandle, SecureChannel};
pub use types::{
    ChannelState, DecryptedMessage, DhOffer, DhReply, HandshakeData, HandshakeMessage,
    HandshakeResponseData,
};
