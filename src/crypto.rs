//! Core AEAD primitives.
//!
//! Every failure inside the AEAD layer collapses to `GuardError::NotAuthenticated`.
//! The ciphers cannot tell a wrong key from a flipped bit or a truncated tag.

use aead::{Aead, KeyInit, Payload};
use aes_gcm_siv::Aes256GcmSiv;
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use getrandom::fill as getrandom;

use crate::types::{AeadAlg, DerivedKey, GuardError, Result};

/// AEAD authentication tag length (16 bytes for all supported algorithms).
pub const AEAD_TAG_LEN: usize = 16;

/// Get the nonce length for a given AEAD algorithm.
pub fn nonce_len_for(alg: AeadAlg) -> usize {
    match alg {
        AeadAlg::XChaCha20Poly1305 => 24,
        AeadAlg::Aes256GcmSiv => 12,
    }
}

/// Generate `len` random bytes for nonces and nonce prefixes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    getrandom(&mut out)?;
    Ok(out)
}

/// Generate a cryptographically secure random nonce for the given algorithm.
pub fn generate_nonce(alg: AeadAlg) -> Result<Vec<u8>> {
    random_bytes(nonce_len_for(alg))
}

fn check_nonce(alg: AeadAlg, nonce: &[u8]) -> Result<()> {
    if nonce.len() != nonce_len_for(alg) {
        return Err(GuardError::Malformed("nonce length does not match algorithm"));
    }
    Ok(())
}

/// Encrypt `plaintext`, authenticating `aad` alongside it.
///
/// The returned ciphertext includes the authentication tag.
pub fn aead_encrypt(
    alg: AeadAlg,
    key: &DerivedKey,
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    check_nonce(alg, nonce)?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    match alg {
        AeadAlg::XChaCha20Poly1305 => create_xchacha20poly1305_cipher(key)?
            .encrypt(XNonce::from_slice(nonce), payload)
            .map_err(|_| GuardError::Invalid("encryption failed")),
        AeadAlg::Aes256GcmSiv => {
            use aes_gcm_siv::aead::generic_array::GenericArray;
            create_aes256gcmsiv_cipher(key)?
                .encrypt(GenericArray::from_slice(nonce), payload)
                .map_err(|_| GuardError::Invalid("encryption failed"))
        }
    }
}

/// Decrypt `ciphertext` produced by [`aead_encrypt`] with the same key, nonce and `aad`.
///
/// # Errors
///
/// Returns `GuardError::NotAuthenticated` if the tag does not verify.
pub fn aead_decrypt(
    alg: AeadAlg,
    key: &DerivedKey,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    check_nonce(alg, nonce)?;
    if ciphertext.len() < AEAD_TAG_LEN {
        return Err(GuardError::NotAuthenticated);
    }
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    match alg {
        AeadAlg::XChaCha20Poly1305 => create_xchacha20poly1305_cipher(key)?
            .decrypt(XNonce::from_slice(nonce), payload)
            .map_err(|_| GuardError::NotAuthenticated),
        AeadAlg::Aes256GcmSiv => {
            use aes_gcm_siv::aead::generic_array::GenericArray;
            create_aes256gcmsiv_cipher(key)?
                .decrypt(GenericArray::from_slice(nonce), payload)
                .map_err(|_| GuardError::NotAuthenticated)
        }
    }
}

/// Create an XChaCha20-Poly1305 cipher instance.
pub fn create_xchacha20poly1305_cipher(key: &DerivedKey) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| GuardError::Invalid("bad key length"))
}

/// Create an AES-256-GCM-SIV cipher instance.
pub fn create_aes256gcmsiv_cipher(key: &DerivedKey) -> Result<Aes256GcmSiv> {
    Aes256GcmSiv::new_from_slice(key.as_bytes()).map_err(|_| GuardError::Invalid("bad key length"))
}
