//! On-disk artifact format.
//!
//! ```text
//! u32 LE header length || CBOR(ArtifactHeader) || body
//! ```
//!
//! The serialized header bytes are authenticated as associated data, so any edit to
//! the header surfaces as an authentication failure. The header records the KDF
//! settings the key was derived with; the salt itself lives in the metadata store
//! next to the file's fingerprint.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::types::{AeadAlg, GuardError, KdfParams, Result};

pub const MAGIC: &[u8; 8] = b"FGUARD\0\0";
pub const VERSION: u16 = 1;

/// Upper bound on the encoded header; anything larger is not ours.
const MAX_HEADER_LEN: u32 = 4096;

/// Initial buffer for a frame; larger frames grow as their bytes arrive.
const FRAME_READ_AHEAD: usize = 64 * 1024;

/// Frame flag: bit0 set => last chunk.
pub const FLAG_FINAL: u8 = 1;

/// Present when the body is chunk-framed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Plaintext bytes per frame (the final frame may be shorter).
    pub chunk_size: u32,
    /// - XChaCha20-Poly1305: 19 bytes (EncryptorBE32 appends counter and last-block flag)
    /// - AES-256-GCM-SIV:    8 bytes (a 32-bit big-endian counter is appended)
    pub nonce_prefix: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub aead_alg: u8,
    /// Single-shot nonce; empty when `stream.is_some()`.
    pub nonce: Vec<u8>,
    /// Plaintext length of the source file.
    pub plain_len: u64,
    pub stream: Option<StreamInfo>,
    /// KDF the key was derived with. Absent for artifacts sealed with a raw key.
    pub kdf: Option<KdfParams>,
}

impl ArtifactHeader {
    pub fn new_single(alg: AeadAlg, nonce: Vec<u8>, plain_len: u64) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            aead_alg: alg as u8,
            nonce,
            plain_len,
            stream: None,
            kdf: None,
        }
    }

    pub fn new_stream(alg: AeadAlg, stream: StreamInfo, plain_len: u64) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            aead_alg: alg as u8,
            nonce: Vec::new(),
            plain_len,
            stream: Some(stream),
            kdf: None,
        }
    }

    pub fn with_kdf(mut self, kdf: Option<KdfParams>) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn alg(&self) -> Result<AeadAlg> {
        AeadAlg::from_id(self.aead_alg)
    }

    /// Encoded header bytes; these are also the associated data for the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)?;
        Ok(out)
    }
}

/// Write the length-prefixed header and return the bytes used as associated data.
pub fn write_header<W: Write>(mut w: W, header: &ArtifactHeader) -> Result<Vec<u8>> {
    let bytes = header.encode()?;
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(&bytes)?;
    Ok(bytes)
}

/// Read and validate the header. Returns the header and its raw bytes.
pub fn read_header<R: Read>(mut r: R) -> Result<(ArtifactHeader, Vec<u8>)> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .map_err(|_| GuardError::Malformed("artifact is shorter than its header"))?;
    let len = u32::from_le_bytes(len_buf);
    if len == 0 || len > MAX_HEADER_LEN {
        return Err(GuardError::Malformed("implausible header length"));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)
        .map_err(|_| GuardError::Malformed("truncated header"))?;
    let header: ArtifactHeader = ciborium::from_reader(bytes.as_slice())
        .map_err(|_| GuardError::Malformed("header is not valid CBOR"))?;
    if &header.magic != MAGIC {
        return Err(GuardError::Malformed("bad magic"));
    }
    if header.version != VERSION {
        return Err(GuardError::UnsupportedVersion(header.version));
    }
    header.alg()?;
    Ok((header, bytes))
}

/// Write a single framed chunk.
pub fn write_frame<W: Write>(mut w: W, ct: &[u8], is_final: bool) -> Result<()> {
    let flags = if is_final { FLAG_FINAL } else { 0 };
    w.write_all(&[flags])?;
    w.write_all(&(ct.len() as u32).to_be_bytes())?;
    w.write_all(ct)?;
    Ok(())
}

/// Read one frame. `Ok(None)` at a clean end of input.
pub fn read_frame<R: Read>(mut r: R, max_len: usize) -> Result<Option<(bool, Vec<u8>)>> {
    let mut flag = [0u8; 1];
    if r.read(&mut flag)? == 0 {
        return Ok(None);
    }
    if flag[0] & !FLAG_FINAL != 0 {
        return Err(GuardError::NotAuthenticated);
    }
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .map_err(|_| GuardError::NotAuthenticated)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(GuardError::NotAuthenticated);
    }
    // the length is not authenticated yet: grow with the input, not with the claim
    let mut ct = Vec::with_capacity(len.min(FRAME_READ_AHEAD));
    r.by_ref().take(len as u64).read_to_end(&mut ct)?;
    if ct.len() != len {
        return Err(GuardError::NotAuthenticated);
    }
    Ok(Some((flag[0] & FLAG_FINAL != 0, ct)))
}
