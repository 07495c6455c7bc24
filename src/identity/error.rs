//! Error types for identity operations.

use thiserror::Error;

/// Errors that can occur while handling node keys and signatures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The secret key bytes do not form a valid secp256k1 key.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The address is not a valid x-only public key.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Signing the digest failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The signature is malformed or does not verify.
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

impl From<hex::FromHexError> for IdentityError {
    fn from(e: hex::FromHexError) -> Self {
        Self::KeyDerivation(e.to_string())
    }
}
