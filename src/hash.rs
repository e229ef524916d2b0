//! Content hashing and integrity verification.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_BUFFER_SIZE, Fingerprint, GuardError, Result};

/// Digest algorithms usable for file fingerprints.
///
/// Default is `Sha256`, which is also what the metadata store signs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashAlg {
    /// SHA-256 (32-byte digest). Default.
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
    /// SHA-512 (64-byte digest)
    #[serde(rename = "sha512")]
    Sha512,
    /// SHA3-256 (32-byte digest)
    #[serde(rename = "sha3-256")]
    Sha3_256,
    /// BLAKE3 (32-byte digest)
    #[serde(rename = "blake3")]
    Blake3,
}

/// Outcome of comparing content against an expected fingerprint.
///
/// A mismatch is a regular value here; I/O failures are reported through `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub name: String,
    pub matched: bool,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

impl Verification {
    fn compare(name: String, expected: &Fingerprint, actual: Fingerprint) -> Self {
        Self {
            matched: &actual == expected,
            name,
            expected: expected.clone(),
            actual,
        }
    }

    /// Operator-facing summary line.
    pub fn detail(&self) -> String {
        if self.matched {
            format!("integrity intact: {}", self.name)
        } else {
            format!(
                "SECURITY ALERT: {} hash mismatch (expected {}, found {})",
                self.name,
                self.expected.short(16),
                self.actual.short(16)
            )
        }
    }

    /// Turn a mismatch into `GuardError::IntegrityMismatch`.
    pub fn into_result(self) -> Result<Fingerprint> {
        if self.matched {
            Ok(self.actual)
        } else {
            Err(GuardError::IntegrityMismatch {
                name: self.name,
                expected: self.expected,
                actual: self.actual,
            })
        }
    }
}

/// Hash a byte slice.
pub fn hash_bytes(data: &[u8], alg: HashAlg) -> Fingerprint {
    match alg {
        HashAlg::Sha256 => {
            use sha2::{Digest, Sha256};
            Fingerprint::from_digest(&Sha256::digest(data))
        }
        HashAlg::Sha512 => {
            use sha2::{Digest, Sha512};
            Fingerprint::from_digest(&Sha512::digest(data))
        }
        HashAlg::Sha3_256 => {
            use sha3::{Digest, Sha3_256};
            Fingerprint::from_digest(&Sha3_256::digest(data))
        }
        HashAlg::Blake3 => Fingerprint::from_digest(blake3::hash(data).as_bytes()),
    }
}

/// Feed `reader` through `update` in chunks of at most `buffer_size` bytes.
fn pump<R: Read>(mut reader: R, buffer_size: usize, mut update: impl FnMut(&[u8])) -> Result<()> {
    if buffer_size == 0 {
        return Err(GuardError::Invalid("hash: buffer size must be > 0"));
    }
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        update(&buf[..n]);
    }
    Ok(())
}

/// Hash a stream in bounded chunks. Memory use is independent of input size.
pub fn hash_reader<R: Read>(reader: R, alg: HashAlg, buffer_size: usize) -> Result<Fingerprint> {
    match alg {
        HashAlg::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut h = Sha256::new();
            pump(reader, buffer_size, |c| h.update(c))?;
            Ok(Fingerprint::from_digest(&h.finalize()))
        }
        HashAlg::Sha512 => {
            use sha2::{Digest, Sha512};
            let mut h = Sha512::new();
            pump(reader, buffer_size, |c| h.update(c))?;
            Ok(Fingerprint::from_digest(&h.finalize()))
        }
        HashAlg::Sha3_256 => {
            use sha3::{Digest, Sha3_256};
            let mut h = Sha3_256::new();
            pump(reader, buffer_size, |c| h.update(c))?;
            Ok(Fingerprint::from_digest(&h.finalize()))
        }
        HashAlg::Blake3 => {
            let mut h = blake3::Hasher::new();
            pump(reader, buffer_size, |c| {
                h.update(c);
            })?;
            Ok(Fingerprint::from_digest(h.finalize().as_bytes()))
        }
    }
}

/// Hash a file (streaming) with the default buffer size.
pub fn hash_file(path: &Path, alg: HashAlg) -> Result<Fingerprint> {
    hash_file_with_buffer(path, alg, DEFAULT_BUFFER_SIZE)
}

pub fn hash_file_with_buffer(path: &Path, alg: HashAlg, buffer_size: usize) -> Result<Fingerprint> {
    if path.is_dir() {
        return Err(GuardError::Invalid("hash: path is a directory"));
    }
    let file = File::open(path).map_err(|e| GuardError::io_at(e, path))?;
    hash_reader(file, alg, buffer_size)
}

/// Compare a stream against `expected`.
pub fn verify_reader<R: Read>(
    reader: R,
    name: &str,
    expected: &Fingerprint,
    alg: HashAlg,
    buffer_size: usize,
) -> Result<Verification> {
    let actual = hash_reader(reader, alg, buffer_size)?;
    Ok(Verification::compare(name.to_owned(), expected, actual))
}

/// Compare a file against `expected`. `Ok(matched == false)` on mismatch.
pub fn verify_file(path: &Path, expected: &Fingerprint, alg: HashAlg) -> Result<Verification> {
    let actual = hash_file(path, alg)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Verification::compare(name, expected, actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sha256_known_answers() {
        assert_eq!(
            hash_bytes(b"", HashAlg::Sha256).as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_bytes(b"abc", HashAlg::Sha256).as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn chunked_matches_whole_buffer_for_every_alg() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i * 31 % 251) as u8).collect();
        for alg in [HashAlg::Sha256, HashAlg::Sha512, HashAlg::Sha3_256, HashAlg::Blake3] {
            let whole = hash_bytes(&data, alg);
            for buf in [1usize, 7, 4096, DEFAULT_BUFFER_SIZE, 1 << 20] {
                let streamed = hash_reader(Cursor::new(&data), alg, buf).unwrap();
                assert_eq!(streamed, whole, "alg={alg:?} buf={buf}");
            }
        }
    }

    #[test]
    fn single_bit_change_changes_fingerprint() {
        let mut data = b"Cybersecurity is about layers.".to_vec();
        let before = hash_bytes(&data, HashAlg::Sha256);
        data[0] ^= 0x01;
        assert_ne!(before, hash_bytes(&data, HashAlg::Sha256));
    }

    #[test]
    fn mismatch_is_a_value_not_an_error() {
        let expected = hash_bytes(b"original", HashAlg::Sha256);
        let v = verify_reader(
            Cursor::new(b"modified"),
            "doc.txt",
            &expected,
            HashAlg::Sha256,
            64,
        )
        .unwrap();
        assert!(!v.matched);
        assert!(v.detail().starts_with("SECURITY ALERT"));
        assert!(matches!(
            v.into_result(),
            Err(GuardError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn zero_buffer_rejected() {
        let res = hash_reader(Cursor::new(b"x"), HashAlg::Sha256, 0);
        assert!(matches!(res, Err(GuardError::Invalid(_))));
    }
}
