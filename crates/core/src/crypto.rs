//! Task id obfuscation.
//!
//! Task ids are encrypted before they leave the worker (callback frames)
//! or reach the logs. The scheme is AES in full-block CFB mode with a
//! random 16-byte IV per call. The IV is prepended to the ciphertext and
//! the whole buffer is encoded with the URL-safe base64 alphabet.
//!
//! The key is supplied as standard base64 and must decode to 16, 24 or
//! 32 bytes (AES-128/192/256).

use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;

/// Size of the AES block, and therefore of the IV prefix.
pub const IV_LEN: usize = 16;

/// Errors produced while encrypting or decrypting a task id.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key is not valid base64 or has an unsupported length.
    #[error("Invalid encryption key: {0}")]
    Key(String),

    /// The ciphertext could not be decoded into `IV || payload`.
    #[error("Malformed ciphertext: {0}")]
    Format(String),
}

/// A decoded AES key of one of the supported sizes.
enum AesKey {
    Aes128(Vec<u8>),
    Aes192(Vec<u8>),
    Aes256(Vec<u8>),
}

impl AesKey {
    fn decode(key: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD
            .decode(key.trim())
            .map_err(|e| CryptoError::Key(format!("key is not valid base64: {e}")))?;

        match raw.len() {
            16 => Ok(Self::Aes128(raw)),
            24 => Ok(Self::Aes192(raw)),
            32 => Ok(Self::Aes256(raw)),
            n => Err(CryptoError::Key(format!(
                "key decodes to {n} bytes, expected 16, 24 or 32"
            ))),
        }
    }

    fn encrypt(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
        match self {
            Self::Aes128(k) => cfb_mode::Encryptor::<Aes128>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .encrypt(buf),
            Self::Aes192(k) => cfb_mode::Encryptor::<Aes192>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .encrypt(buf),
            Self::Aes256(k) => cfb_mode::Encryptor::<Aes256>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .encrypt(buf),
        }
        Ok(())
    }

    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
        match self {
            Self::Aes128(k) => cfb_mode::Decryptor::<Aes128>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .decrypt(buf),
            Self::Aes192(k) => cfb_mode::Decryptor::<Aes192>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .decrypt(buf),
            Self::Aes256(k) => cfb_mode::Decryptor::<Aes256>::new_from_slices(k, iv)
                .map_err(invalid_length)?
                .decrypt(buf),
        }
        Ok(())
    }
}

fn invalid_length(e: cfb_mode::cipher::InvalidLength) -> CryptoError {
    CryptoError::Key(e.to_string())
}

/// Check that `key` is usable without encrypting anything.
///
/// Used at startup so a bad key fails fast instead of dropping every job.
pub fn validate_key(key: &str) -> Result<(), CryptoError> {
    AesKey::decode(key).map(|_| ())
}

/// Encrypt `plaintext` with the base64-encoded `key`.
///
/// Every call draws a fresh IV, so encrypting the same input twice
/// yields different outputs.
pub fn encrypt(plaintext: &str, key: &str) -> Result<String, CryptoError> {
    let key = AesKey::decode(key)?;

    let mut buf = vec![0u8; IV_LEN + plaintext.len()];
    let (iv, payload) = buf.split_at_mut(IV_LEN);
    rand::rng().fill_bytes(iv);
    payload.copy_from_slice(plaintext.as_bytes());
    key.encrypt(iv, payload)?;

    Ok(URL_SAFE.encode(&buf))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(ciphertext: &str, key: &str) -> Result<String, CryptoError> {
    let key = AesKey::decode(key)?;

    let mut buf = URL_SAFE
        .decode(ciphertext)
        .map_err(|e| CryptoError::Format(format!("ciphertext is not valid base64: {e}")))?;

    if buf.len() < IV_LEN {
        return Err(CryptoError::Format(format!(
            "ciphertext too short: {} bytes, need at least {IV_LEN}",
            buf.len()
        )));
    }

    let (iv, payload) = buf.split_at_mut(IV_LEN);
    key.decrypt(iv, payload)?;

    String::from_utf8(payload.to_vec())
        .map_err(|e| CryptoError::Format(format!("plaintext is not UTF-8: {e}")))
}
