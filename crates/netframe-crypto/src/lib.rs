//! Symmetric cipher and key-pair generation for the netframe protocol.
//!
//! Implements the `cryptor` external collaborator contract directly:
//! `encrypt(bytes, key, iv)`, `decrypt(bytes, key, iv)`, `create_key()`.
//! There is no epoch, sender index, or ratchet here — session confirmation
//! negotiates a single static `(key, iv)` pair for the lifetime of the
//! session, so no key hierarchy has anything to attach to. The primitive
//! itself is `XChaCha20-Poly1305` via the `chacha20poly1305` crate, with
//! `zeroize` on drop for key material.

#![forbid(unsafe_code)]

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key length in bytes for `XChaCha20-Poly1305`.
pub const KEY_LEN: usize = 32;
/// Nonce (`iv`) length in bytes for `XChaCha20-Poly1305`.
pub const IV_LEN: usize = 24;

/// Errors from the symmetric cipher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// `key` was not exactly [`KEY_LEN`] bytes.
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    /// `iv` was not exactly [`IV_LEN`] bytes.
    #[error("iv must be {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),
    /// Authentication failed (tampered ciphertext or wrong key/iv).
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,
}

/// A generated `(key, iv)` pair for a newly confirmed encrypted session.
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    /// 32-byte symmetric key.
    pub key: Vec<u8>,
    /// 24-byte nonce, reused for every frame in the session (the session
    /// layer, not this crate, is responsible for any rotation policy).
    pub iv: Vec<u8>,
}

/// Generate a fresh key/iv pair from caller-supplied random bytes.
///
/// Pure and deterministic given `random_bytes`; callers provide
/// cryptographically secure entropy in production (see
/// `netframe_core::env::Environment::create_key`).
#[must_use]
pub fn create_key(random_bytes: impl FnOnce(usize) -> Vec<u8>) -> KeyPair {
    let combined = random_bytes(KEY_LEN + IV_LEN);
    let (key, iv) = combined.split_at(KEY_LEN);
    KeyPair { key: key.to_vec(), iv: iv.to_vec() }
}

fn build_cipher(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Ok(XChaCha20Poly1305::new(key.into()))
}

fn build_nonce(iv: &[u8]) -> Result<&XNonce, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidIvLength(iv.len()));
    }
    Ok(XNonce::from_slice(iv))
}

/// Encrypt `plaintext` under `(key, iv)`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`]/[`CryptoError::InvalidIvLength`]
/// if either buffer is the wrong size.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = build_cipher(key)?;
    let nonce = build_nonce(iv)?;
    cipher.encrypt(nonce, plaintext).map_err(|_| CryptoError::AuthenticationFailed)
}

/// Decrypt `ciphertext` under `(key, iv)`.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] if the tag doesn't match
/// (tampered ciphertext, or wrong key/iv), or a length error as in
/// [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = build_cipher(key)?;
    let nonce = build_nonce(iv)?;
    cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_randomness(n: usize) -> Vec<u8> {
        (0..n).map(|i| i as u8).collect()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let pair = create_key(fixed_randomness);
        let plaintext = b"hello, netframe";
        let ciphertext = encrypt(plaintext, &pair.key, &pair.iv).unwrap();
        let decrypted = decrypt(&ciphertext, &pair.key, &pair.iv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let pair = create_key(fixed_randomness);
        let plaintext = b"non-trivial payload";
        let ciphertext = encrypt(plaintext, &pair.key, &pair.iv).unwrap();
        assert_ne!(ciphertext, plaintext.to_vec());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let pair = create_key(fixed_randomness);
        let mut ciphertext = encrypt(b"secret", &pair.key, &pair.iv).unwrap();
        ciphertext[0] ^= 0xFF;
        assert_eq!(decrypt(&ciphertext, &pair.key, &pair.iv), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let pair = create_key(fixed_randomness);
        let ciphertext = encrypt(b"secret", &pair.key, &pair.iv).unwrap();
        let other = create_key(|n| vec![0xAAu8; n]);
        assert_eq!(decrypt(&ciphertext, &other.key, &pair.iv), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn rejects_wrong_length_key() {
        let err = encrypt(b"x", &[0u8; 16], &[0u8; IV_LEN]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength(16));
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let pair = create_key(fixed_randomness);
        let ciphertext = encrypt(b"", &pair.key, &pair.iv).unwrap();
        let decrypted = decrypt(&ciphertext, &pair.key, &pair.iv).unwrap();
        assert!(decrypted.is_empty());
    }
}
