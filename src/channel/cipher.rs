//! AES-256-CBC payload encryption.
//!
//! The key is the SHA-256 digest of the negotiated DH secret. Each message
//! gets a fresh random 16-byte IV; IV and ciphertext are base64 encoded in
//! the envelope's `{iv, d}` payload.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde_json::Value;
use zeroize::Zeroizing;

use super::error::{ChannelError, ChannelResult};
use crate::envelope::EncryptedPayload;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypts UTF-8 text.
///
/// # Errors
///
/// Returns an error if the cipher cannot be initialized.
pub fn encrypt_payload(plaintext: &str, key: &Zeroizing<[u8; 32]>) -> ChannelResult<EncryptedPayload> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_slice(), &iv)
        .map_err(|e| ChannelError::Encryption(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(EncryptedPayload {
        iv: STANDARD.encode(iv),
        d: STANDARD.encode(ciphertext),
    })
}

/// Decrypts a payload back to UTF-8 text.
///
/// # Errors
///
/// Returns [`ChannelError::Decryption`] if decoding, unpadding or UTF-8
/// validation fails.
pub fn decrypt_payload(payload: &EncryptedPayload, key: &Zeroizing<[u8; 32]>) -> ChannelResult<String> {
    let iv = STANDARD
        .decode(&payload.iv)
        .map_err(|e| ChannelError::Decryption(format!("Base64 decode error: {e}")))?;
    let ciphertext = STANDARD
        .decode(&payload.d)
        .map_err(|e| ChannelError::Decryption(format!("Base64 decode error: {e}")))?;

    let cipher = Aes256CbcDec::new_from_slices(key.as_slice(), &iv)
        .map_err(|e| ChannelError::Decryption(format!("Invalid IV: {e}")))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| ChannelError::Decryption(e.to_string()))?,
    );

    String::from_utf8(plaintext.to_vec())
        .map_err(|e| ChannelError::Decryption(format!("UTF-8 decode error: {e}")))
}

/// Serializes a JSON value and encrypts it.
///
/// # Errors
///
/// Returns an error if serialization or encryption fails.
pub fn encrypt_value(body: &Value, key: &Zeroizing<[u8; 32]>) -> ChannelResult<EncryptedPayload> {
    let plaintext = Zeroizing::new(serde_json::to_string(body)?);
    encrypt_payload(&plaintext, key)
}

/// Decrypts a payload and parses it as JSON.
///
/// # Errors
///
/// Returns an error if decryption or parsing fails.
pub fn decrypt_value(payload: &EncryptedPayload, key: &Zeroizing<[u8; 32]>) -> ChannelResult<Value> {
    let plaintext = Zeroizing::new(decrypt_payload(payload, key)?);
    Ok(serde_json::from_str(&plaintext)?)
}
