//! Long-lived node keypair.
//!
//! The secret key bytes are held separately from any `secp256k1` object and
//! zeroized on drop. Signing reconstructs the keypair from a temporary copy
//! which is wiped afterwards.

use std::sync::LazyLock;

use nostr::secp256k1::schnorr::Signature;
use nostr::secp256k1::{rand::rngs::OsRng, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::{IdentityError, IdentityResult};

/// Global secp256k1 context for signing and verification.
///
/// Building a context precomputes tables, so one shared instance is reused
/// for every operation.
pub static SECP: LazyLock<Secp256k1<nostr::secp256k1::All>> = LazyLock::new(Secp256k1::new);

/// The keypair a node signs its envelopes with.
///
/// # Example
///
/// ```
/// use starwave_core::identity::NodeKeypair;
///
/// let keypair = NodeKeypair::generate();
/// assert_eq!(keypair.address().len(), 64);
/// ```
#[derive(ZeroizeOnDrop)]
pub struct NodeKeypair {
    /// The secret key bytes (zeroized on drop).
    secret_bytes: [u8; 32],

    /// Cached x-only public key bytes.
    #[zeroize(skip)]
    pubkey_bytes: [u8; 32],
}

impl NodeKeypair {
    /// Generates a new random keypair from the OS random number generator.
    #[must_use]
    pub fn generate() -> Self {
        let keypair = Keypair::new(&SECP, &mut OsRng);
        let secret_bytes = keypair.secret_key().secret_bytes();
        let (public_key, _parity) = keypair.x_only_public_key();

        Self {
            secret_bytes,
            pubkey_bytes: public_key.serialize(),
        }
    }

    /// Creates a keypair from raw secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid secp256k1 secret key.
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> IdentityResult<Self> {
        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();

        Ok(Self {
            secret_bytes,
            pubkey_bytes: public_key.serialize(),
        })
    }

    /// Creates a keypair from a hex-encoded secret key.
    ///
    /// A leading `0x` is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 32 bytes of hex or not a valid key.
    pub fn from_secret_hex(secret_hex: &str) -> IdentityResult<Self> {
        let trimmed = secret_hex.trim().trim_start_matches("0x");
        let decoded = Zeroizing::new(hex::decode(trimmed)?);
        let mut secret_bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            IdentityError::KeyDerivation(format!(
                "expected 32 secret key bytes, got {}",
                decoded.len()
            ))
        })?;

        let result = Self::from_secret_bytes(secret_bytes);
        secret_bytes.zeroize();
        result
    }

    /// Returns the node address: the lowercase hex x-only public key.
    #[must_use]
    pub fn address(&self) -> String {
        hex::encode(self.pubkey_bytes)
    }

    /// Returns the raw x-only public key bytes.
    #[must_use]
    pub const fn pubkey_bytes(&self) -> [u8; 32] {
        self.pubkey_bytes
    }

    /// Signs a 32-byte digest with a BIP-340 Schnorr signature.
    ///
    /// Returns the 64-byte signature as a 128-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored secret cannot be reconstructed.
    pub fn sign(&self, digest: &[u8; 32]) -> IdentityResult<String> {
        let mut secret_bytes_copy = self.secret_bytes;

        let result = (|| {
            let secret_key = SecretKey::from_slice(&secret_bytes_copy)
                .map_err(|e| IdentityError::Signing(e.to_string()))?;
            let keypair = Keypair::from_secret_key(&SECP, &secret_key);
            let message = Message::from_digest(*digest);
            let signature = SECP.sign_schnorr(&message, &keypair);
            Ok(hex::encode(signature.serialize()))
        })();

        secret_bytes_copy.zeroize();

        result
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("NodeKeypair")
            .field("address", &self.address())
            .finish()
    }
}

/// Verifies that `signature_hex` is a valid signature of `digest` by `address`.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidAddress`] if the address is not a valid
/// x-only public key, and [`IdentityError::InvalidSignature`] if the signature
/// is malformed or does not verify.
pub fn verify_signature(address: &str, digest: &[u8; 32], signature_hex: &str) -> IdentityResult<()> {
    let pubkey_bytes: [u8; 32] = hex::decode(address)
        .map_err(|e| IdentityError::InvalidAddress(format!("{address}: {e}")))?
        .try_into()
        .map_err(|_| IdentityError::InvalidAddress(format!("{address}: wrong length")))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| IdentityError::InvalidAddress(format!("{address}: {e}")))?;

    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|_| IdentityError::InvalidSignature)?
        .try_into()
        .map_err(|_| IdentityError::InvalidSignature)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| IdentityError::InvalidSignature)?;

    let message = Message::from_digest(*digest);
    SECP.verify_schnorr(&signature, &message, &pubkey)
        .map_err(|_| IdentityError::InvalidSignature)
}
