//! Finite-field Diffie-Hellman over a MODP group.

use num_bigint::{BigUint, RandBigInt};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::error::{ChannelError, ChannelResult};

/// The 2048-bit MODP prime from RFC 3526 (group 14).
pub const RFC3526_GROUP14_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Generator paired with the RFC 3526 prime.
const RFC3526_GENERATOR: u32 = 2;

/// Primes used for trial division before Miller-Rabin.
const SMALL_PRIMES: [u32; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Fixed Miller-Rabin witnesses; random ones are added on top.
const FIXED_WITNESSES: [u32; 4] = [2, 3, 5, 7];

/// Number of random Miller-Rabin witnesses.
const RANDOM_WITNESSES: usize = 4;

/// Miller-Rabin probable-prime test.
fn is_probable_prime(n: &BigUint) -> bool {
    let zero = BigUint::from(0u32);
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if n % &small == zero {
            return false;
        }
    }

    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = rand::thread_rng();
    let upper = n - &two;
    let witnesses = FIXED_WITNESSES
        .iter()
        .map(|&a| BigUint::from(a))
        .chain((0..RANDOM_WITNESSES).map(|_| rng.gen_biguint_range(&two, &upper)));

    'witness: for a in witnesses {
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Decodes big-endian hex, tolerating an odd number of digits.
fn biguint_from_hex(value: &str) -> ChannelResult<BigUint> {
    let trimmed = value.trim();
    let bytes = if trimmed.len() % 2 == 1 {
        hex::decode(format!("0{trimmed}"))?
    } else {
        hex::decode(trimmed)?
    };
    Ok(BigUint::from_bytes_be(&bytes))
}

fn biguint_to_hex(value: &BigUint) -> String {
    hex::encode(value.to_bytes_be())
}

/// A prime modulus and generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    prime: BigUint,
    generator: BigUint,
}

impl Default for DhGroup {
    fn default() -> Self {
        Self::rfc3526_2048()
    }
}

impl DhGroup {
    /// Returns the RFC 3526 2048-bit group with generator 2.
    #[must_use]
    pub fn rfc3526_2048() -> Self {
        let prime = BigUint::parse_bytes(RFC3526_GROUP14_PRIME_HEX.as_bytes(), 16)
            .unwrap_or_default();
        Self {
            prime,
            generator: BigUint::from(RFC3526_GENERATOR),
        }
    }

    /// Creates a group from raw values.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidHandshake`] if the prime is too small
    /// to carry a key or the generator is outside `(1, p-1)`.
    pub fn new(prime: BigUint, generator: BigUint) -> ChannelResult<Self> {
        if prime < BigUint::from(5u32) {
            return Err(ChannelError::InvalidHandshake("prime too small".to_string()));
        }
        let upper = &prime - 1u32;
        if generator <= BigUint::from(1u32) || generator >= upper {
            return Err(ChannelError::InvalidHandshake(
                "generator out of range".to_string(),
            ));
        }
        Ok(Self { prime, generator })
    }

    /// Creates a group from hex-encoded prime and generator.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is not hex or fails validation.
    pub fn from_hex(prime_hex: &str, generator_hex: &str) -> ChannelResult<Self> {
        Self::new(biguint_from_hex(prime_hex)?, biguint_from_hex(generator_hex)?)
    }

    /// Returns the prime as lowercase big-endian hex.
    #[must_use]
    pub fn prime_hex(&self) -> String {
        biguint_to_hex(&self.prime)
    }

    /// Returns the generator as lowercase big-endian hex.
    #[must_use]
    pub fn generator_hex(&self) -> String {
        biguint_to_hex(&self.generator)
    }

    /// Returns the size of the prime in bits.
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.prime.bits()
    }

    /// Returns true if the modulus passes a Miller-Rabin probable-prime test.
    ///
    /// Cost grows with the modulus size, so bound [`bits`](Self::bits)
    /// before calling this on untrusted input.
    #[must_use]
    pub fn has_probable_prime(&self) -> bool {
        is_probable_prime(&self.prime)
    }

    /// Returns the size of the prime in bytes; shared secrets have this length.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        usize::try_from(self.prime.bits().div_ceil(8)).unwrap_or(usize::MAX)
    }

    /// Generates an ephemeral keypair in this group.
    #[must_use]
    pub fn generate_keypair(&self) -> DhKeypair {
        let low = BigUint::from(2u32);
        let high = &self.prime - 1u32;
        let private = rand::thread_rng().gen_biguint_range(&low, &high);
        let public = self.generator.modpow(&private, &self.prime);

        DhKeypair {
            group: self.clone(),
            private,
            public,
        }
    }
}

/// An ephemeral Diffie-Hellman keypair.
pub struct DhKeypair {
    group: DhGroup,
    private: BigUint,
    public: BigUint,
}

impl DhKeypair {
    /// Returns the group this keypair belongs to.
    #[must_use]
    pub const fn group(&self) -> &DhGroup {
        &self.group
    }

    /// Returns the public value as lowercase big-endian hex.
    #[must_use]
    pub fn public_hex(&self) -> String {
        biguint_to_hex(&self.public)
    }

    /// Combines this keypair with the peer's public value.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidHandshake`] if the peer value is
    /// outside `(1, p-1)`, or a hex error if it cannot be decoded.
    pub fn compute_secret(&self, peer_public_hex: &str) -> ChannelResult<SharedSecret> {
        let peer = biguint_from_hex(peer_public_hex)?;
        let upper = &self.group.prime - 1u32;
        if peer <= BigUint::from(1u32) || peer >= upper {
            return Err(ChannelError::InvalidHandshake(
                "public key out of range".to_string(),
            ));
        }

        let shared = peer.modpow(&self.private, &self.group.prime).to_bytes_be();
        let len = self.group.byte_len();
        let mut padded = Zeroizing::new(vec![0u8; len.saturating_sub(shared.len())]);
        padded.extend_from_slice(&shared);
        Ok(SharedSecret(padded))
    }
}

impl std::fmt::Debug for DhKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeypair")
            .field("bits", &self.group.bits())
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// A negotiated shared secret, zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Returns the raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derives the AES-256 key: `SHA-256(secret)`.
    #[must_use]
    pub fn encryption_key(&self) -> Zeroizing<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_slice());
        Zeroizing::new(hasher.finalize().into())
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Length only
        f.debug_tuple("SharedSecret").field(&self.0.len()).finish()
    }
}
