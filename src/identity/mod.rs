//! Node identity: address derivation, signing and verification.
//!
//! A node is identified by its secp256k1 x-only public key, rendered as a
//! 64-character lowercase hex string. That string doubles as the node's
//! routing-table vertex and as the `from`/`to` of every envelope.
//!
//! Envelopes are signed with BIP-340 Schnorr signatures over their 32-byte
//! SHA-256 hash. Verification checks the signature against the claimed
//! `from` address directly, so a valid signature proves the sender.

mod error;
mod keypair;

pub use error::{IdentityError, IdentityResult};
pub use keypair::{verify_signature, NodeKeypair, SECP};
