//! Concrete `Transforms` builders: wires `flate2` (compression) and
//! `netframe-crypto` (encryption) into the generic [`crate::pipeline::Transforms`]
//! stage hooks.
//!
//! The pipeline module itself stays agnostic of which compressor/cipher is
//! used — compression and encryption are external collaborators. This
//! module is the one place that picks concrete ones; a caller who needs
//! the `specific_compress_sequence`/`specific_encrypt_sequence` override
//! instead constructs [`Transforms`] directly.

use std::{io::Write, sync::Arc};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::pipeline::Transforms;

#[allow(clippy::expect_used)]
fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // An in-memory Vec<u8> writer only fails on allocation failure.
    encoder.write_all(bytes).expect("in-memory zlib encode cannot fail");
    encoder.finish().expect("in-memory zlib encode cannot fail")
}

/// Decompress bytes produced by [`compress`].
///
/// On malformed input this returns the bytes unchanged rather than
/// panicking; a corrupt payload then fails at the next stage (deserialize
/// or split-header) as the appropriate protocol error, per the codec's
/// resync-don't-crash policy.
fn decompress(bytes: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(()) => out,
        Err(_) => bytes.to_vec(),
    }
}

/// Build the default [`Transforms`] for a session given its negotiated
/// flags and (if `encrypt_mode` is on and the session is confirmed) key
/// material.
///
/// `key`/`iv` are ignored (encrypt/decrypt stay identity) unless both are
/// supplied, matching the invariant that key material is only present once
/// confirmed with `encrypt_mode` enabled.
#[must_use]
pub fn build(compress_mode: bool, encrypt_mode: bool, key: Option<&[u8]>, iv: Option<&[u8]>) -> Transforms {
    let mut transforms = Transforms::default();

    if compress_mode {
        transforms.compress = Some(Arc::new(compress));
        transforms.decompress = Some(Arc::new(decompress));
    }

    if let (true, Some(key), Some(iv)) = (encrypt_mode, key, iv) {
        let key = key.to_vec();
        let iv = iv.to_vec();
        let (enc_key, enc_iv) = (key.clone(), iv.clone());
        transforms.encrypt = Some(Arc::new(move |bytes: &[u8]| {
            netframe_crypto::encrypt(bytes, &enc_key, &enc_iv).unwrap_or_else(|_| bytes.to_vec())
        }));
        transforms.decrypt = Some(Arc::new(move |bytes: &[u8]| {
            netframe_crypto::decrypt(bytes, &key, &iv).unwrap_or_else(|_| bytes.to_vec())
        }));
    }

    transforms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_both_modes_disabled() {
        let transforms = build(false, false, None, None);
        assert!(transforms.compress.is_none());
        assert!(transforms.encrypt.is_none());
    }

    #[test]
    fn compress_then_decompress_round_trips() {
        let transforms = build(true, false, None, None);
        let original = b"hello hello hello hello hello".to_vec();
        let compressed = (transforms.compress.as_ref().unwrap())(&original);
        let restored = (transforms.decompress.as_ref().unwrap())(&compressed);
        assert_eq!(restored, original);
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = vec![7u8; netframe_crypto::KEY_LEN];
        let iv = vec![9u8; netframe_crypto::IV_LEN];
        let transforms = build(false, true, Some(&key), Some(&iv));
        let original = b"secret payload".to_vec();
        let ciphertext = (transforms.encrypt.as_ref().unwrap())(&original);
        assert_ne!(ciphertext, original);
        let restored = (transforms.decrypt.as_ref().unwrap())(&ciphertext);
        assert_eq!(restored, original);
    }

    #[test]
    fn missing_key_material_keeps_encrypt_identity() {
        let transforms = build(false, true, None, None);
        assert!(transforms.encrypt.is_none());
        assert!(transforms.decrypt.is_none());
    }
}
