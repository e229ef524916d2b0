//! Chunk-framed encryption for large files (constant memory usage).
//!
//! Frame layout: `flag u8 || u32 BE ciphertext length || ciphertext`. The last frame
//! carries `FLAG_FINAL`; an input of length zero still produces one (empty) final
//! frame so that truncation to nothing is detectable.
//!
//! - XChaCha20-Poly1305 uses the STREAM construction (`EncryptorBE32`), whose nonce
//!   encodes the frame counter and the last-block flag.
//! - AES-256-GCM-SIV uses `prefix || counter` nonces; counter and flag are appended
//!   to the associated data.

use std::io::{Read, Write};

use aead::Payload;
use aead::generic_array::GenericArray;
use zeroize::Zeroizing;

use crate::crypto::{
    AEAD_TAG_LEN, create_aes256gcmsiv_cipher, create_xchacha20poly1305_cipher, random_bytes,
};
use crate::format::{ArtifactHeader, FLAG_FINAL, StreamInfo, read_frame, write_frame, write_header};
use crate::types::{AeadAlg, DEFAULT_CHUNK_SIZE, DerivedKey, GuardError, KdfParams, Result};

const XCHACHA_PREFIX_LEN: usize = 19;
const SIV_PREFIX_LEN: usize = 8;

fn prefix_len_for(alg: AeadAlg) -> usize {
    match alg {
        AeadAlg::XChaCha20Poly1305 => XCHACHA_PREFIX_LEN,
        AeadAlg::Aes256GcmSiv => SIV_PREFIX_LEN,
    }
}

/// Validate a streaming chunk size against the 32-bit frame length format.
///
/// Each frame length is a big-endian u32 of *ciphertext* bytes and AEAD adds a
/// 16-byte tag, so the largest plaintext chunk is `u32::MAX - 16`.
pub fn validate_chunk_size_for_streaming(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(GuardError::Invalid("chunk_size must be > 0"));
    }
    let max_pt = (u32::MAX as usize).saturating_sub(AEAD_TAG_LEN);
    if chunk_size > max_pt {
        return Err(GuardError::Invalid("chunk_size too large for 32-bit frame"));
    }
    Ok(())
}

/// Number of frames needed for `plain_len` bytes (at least one).
fn frame_count(plain_len: u64, chunk_size: usize) -> Result<u64> {
    let frames = plain_len.div_ceil(chunk_size as u64).max(1);
    if frames > u32::MAX as u64 {
        return Err(GuardError::Invalid("input needs more frames than a 32-bit counter allows"));
    }
    Ok(frames)
}

fn siv_nonce(prefix: &[u8], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..SIV_PREFIX_LEN].copy_from_slice(prefix);
    nonce[SIV_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn siv_aad(header_aad: &[u8], counter: u32, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header_aad.len() + 5);
    aad.extend_from_slice(header_aad);
    aad.extend_from_slice(&counter.to_be_bytes());
    aad.push(if is_final { FLAG_FINAL } else { 0 });
    aad
}

/// Encrypt exactly `plain_len` bytes from `reader` into `writer` (header included).
///
/// `kdf` is recorded in the header when the key came from a password.
pub fn encrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &DerivedKey,
    alg: AeadAlg,
    chunk_size: usize,
    plain_len: u64,
    kdf: Option<KdfParams>,
) -> Result<()> {
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    validate_chunk_size_for_streaming(chunk_size)?;
    let frames = frame_count(plain_len, chunk_size)?;

    let info = StreamInfo {
        chunk_size: chunk_size as u32,
        nonce_prefix: random_bytes(prefix_len_for(alg))?,
    };
    let header = ArtifactHeader::new_stream(alg, info.clone(), plain_len).with_kdf(kdf);
    let header_aad = write_header(&mut writer, &header)?;

    let mut buf = Zeroizing::new(vec![0u8; chunk_size]);
    let mut remaining = plain_len;
    let mut next_chunk = |buf: &mut [u8]| -> Result<usize> {
        let take = remaining.min(chunk_size as u64) as usize;
        reader.read_exact(&mut buf[..take])?;
        remaining -= take as u64;
        Ok(take)
    };

    match alg {
        AeadAlg::XChaCha20Poly1305 => {
            use chacha20poly1305::aead::stream::EncryptorBE32;

            let cipher = create_xchacha20poly1305_cipher(key)?;
            let prefix = GenericArray::from_slice(&info.nonce_prefix);
            let mut encryptor = EncryptorBE32::from_aead(cipher, prefix);

            for _ in 1..frames {
                let n = next_chunk(&mut buf[..])?;
                let payload = Payload {
                    msg: &buf[..n],
                    aad: &header_aad,
                };
                let ct = encryptor
                    .encrypt_next(payload)
                    .map_err(|_| GuardError::Invalid("encryption failed"))?;
                write_frame(&mut writer, &ct, false)?;
            }
            let n = next_chunk(&mut buf[..])?;
            let payload = Payload {
                msg: &buf[..n],
                aad: &header_aad,
            };
            let ct = encryptor
                .encrypt_last(payload)
                .map_err(|_| GuardError::Invalid("encryption failed"))?;
            write_frame(&mut writer, &ct, true)?;
        }
        AeadAlg::Aes256GcmSiv => {
            use aead::Aead;

            let cipher = create_aes256gcmsiv_cipher(key)?;
            for counter in 0..frames as u32 {
                let is_final = u64::from(counter) + 1 == frames;
                let n = next_chunk(&mut buf[..])?;
                let nonce = siv_nonce(&info.nonce_prefix, counter);
                let aad = siv_aad(&header_aad, counter, is_final);
                let payload = Payload {
                    msg: &buf[..n],
                    aad: &aad,
                };
                let ct = cipher
                    .encrypt(GenericArray::from_slice(&nonce), payload)
                    .map_err(|_| GuardError::Invalid("encryption failed"))?;
                write_frame(&mut writer, &ct, is_final)?;
            }
        }
    }

    // the source must not have grown while we were reading it
    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(GuardError::Invalid("source changed while it was being encrypted"));
    }
    Ok(())
}

/// Decrypt the frames following a streaming header. Returns the plaintext length.
///
/// Truncation, reordering, a missing final frame and trailing bytes all surface as
/// `GuardError::NotAuthenticated`.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &DerivedKey,
    alg: AeadAlg,
    info: &StreamInfo,
    header_aad: &[u8],
    plain_len: u64,
) -> Result<u64> {
    let chunk_size = info.chunk_size as usize;
    validate_chunk_size_for_streaming(chunk_size)
        .map_err(|_| GuardError::Malformed("stream chunk size out of range"))?;
    if info.nonce_prefix.len() != prefix_len_for(alg) {
        return Err(GuardError::Malformed("stream nonce prefix has the wrong length"));
    }
    let max_ct = chunk_size + AEAD_TAG_LEN;
    let mut written: u64 = 0;

    match alg {
        AeadAlg::XChaCha20Poly1305 => {
            use chacha20poly1305::aead::stream::DecryptorBE32;

            let cipher = create_xchacha20poly1305_cipher(key)?;
            let prefix = GenericArray::from_slice(&info.nonce_prefix);
            let mut decryptor = DecryptorBE32::from_aead(cipher, prefix);

            loop {
                let (is_final, ct) =
                    read_frame(&mut reader, max_ct)?.ok_or(GuardError::NotAuthenticated)?;
                let payload = Payload { msg: &ct, aad: header_aad };
                if is_final {
                    let pt = Zeroizing::new(
                        decryptor
                            .decrypt_last(payload)
                            .map_err(|_| GuardError::NotAuthenticated)?,
                    );
                    writer.write_all(&pt)?;
                    written += pt.len() as u64;
                    break;
                }
                let pt = Zeroizing::new(
                    decryptor
                        .decrypt_next(payload)
                        .map_err(|_| GuardError::NotAuthenticated)?,
                );
                writer.write_all(&pt)?;
                written += pt.len() as u64;
            }
        }
        AeadAlg::Aes256GcmSiv => {
            use aead::Aead;

            let cipher = create_aes256gcmsiv_cipher(key)?;
            let mut counter: u32 = 0;
            loop {
                let (is_final, ct) =
                    read_frame(&mut reader, max_ct)?.ok_or(GuardError::NotAuthenticated)?;
                let nonce = siv_nonce(&info.nonce_prefix, counter);
                let aad = siv_aad(header_aad, counter, is_final);
                let payload = Payload {
                    msg: &ct,
                    aad: &aad,
                };
                let pt = Zeroizing::new(
                    cipher
                        .decrypt(GenericArray::from_slice(&nonce), payload)
                        .map_err(|_| GuardError::NotAuthenticated)?,
                );
                writer.write_all(&pt)?;
                written += pt.len() as u64;
                if is_final {
                    break;
                }
                counter = counter.checked_add(1).ok_or(GuardError::NotAuthenticated)?;
            }
        }
    }

    if read_frame(&mut reader, max_ct)?.is_some() {
        return Err(GuardError::NotAuthenticated);
    }
    if written != plain_len {
        return Err(GuardError::Malformed("plaintext length disagrees with header"));
    }
    Ok(written)
}
