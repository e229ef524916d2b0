//! Core types, options and the error taxonomy for file_guard.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::{Engine, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Symmetric key length shared by every supported AEAD (256-bit).
pub const KEY_LEN: usize = 32;

/// Default salt length in bytes.
pub const DEFAULT_SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 480_000;

/// Default read buffer for hashing and copying (128 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Default chunk size for streamed artifacts (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Files larger than this are encrypted with chunked framing (16 MiB).
pub const DEFAULT_STREAM_THRESHOLD: u64 = 16 << 20;

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AeadAlg {
    /// XChaCha20-Poly1305 (24-byte nonces, STREAM construction for large files).
    #[default]
    XChaCha20Poly1305 = 1,
    /// AES-256-GCM-SIV (12-byte nonces, prefix || counter for large files).
    Aes256GcmSiv = 2,
}

impl AeadAlg {
    pub(crate) fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(AeadAlg::XChaCha20Poly1305),
            2 => Ok(AeadAlg::Aes256GcmSiv),
            other => Err(GuardError::UnsupportedAlgorithm(other)),
        }
    }
}

/// Supported password KDFs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlg {
    /// PBKDF2-HMAC-SHA256.
    #[default]
    Pbkdf2Sha256,
    /// Argon2id (memory-hard alternative).
    Argon2id,
}

/// Tunable KDF parameters. Doubles as the `[kdf]` section of the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KdfParams {
    #[serde(rename = "algorithm")]
    pub alg: KdfAlg,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// Length of freshly generated salts.
    pub salt_len: usize,
    /// Argon2id passes.
    pub argon2_t_cost: u32,
    /// Argon2id memory in KiB.
    pub argon2_mem_kib: u32,
    pub argon2_parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            alg: KdfAlg::default(),
            iterations: DEFAULT_PBKDF2_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            argon2_t_cost: 3,
            argon2_mem_kib: 64 * 1024,
            argon2_parallelism: (num_cpus::get() as u32).clamp(1, 4),
        }
    }
}

/// Options for the file transform engine. Doubles as the `[cipher]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CipherOptions {
    #[serde(rename = "algorithm")]
    pub alg: AeadAlg,
    /// Suffix appended to a plaintext file name to name its artifact (without the dot).
    pub encrypted_suffix: String,
    /// Sources strictly larger than this many bytes are written with chunked framing.
    pub stream_threshold: u64,
    /// Plaintext bytes per frame in chunked mode.
    pub chunk_size: usize,
}

impl Default for CipherOptions {
    fn default() -> Self {
        Self {
            alg: AeadAlg::default(),
            encrypted_suffix: "enc".to_owned(),
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl CipherOptions {
    pub fn with_alg(mut self, alg: AeadAlg) -> Self {
        self.alg = alg;
        self
    }

    /// Force chunked framing for anything larger than `threshold` bytes.
    pub fn with_stream_threshold(mut self, threshold: u64, chunk_size: usize) -> Self {
        self.stream_threshold = threshold;
        self.chunk_size = chunk_size;
        self
    }
}

/// Random per-file salt.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text form persisted in metadata records (standard base64).
    pub fn to_text(&self) -> String {
        general_purpose::STANDARD.encode(&self.0)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|_| GuardError::Malformed("salt is not valid base64"))?;
        if bytes.is_empty() {
            return Err(GuardError::Malformed("salt is empty"));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_text())
    }
}

/// Key material derived from a password and a salt. Wiped on drop.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        // no early exit on the first differing byte
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for DerivedKey {}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Lowercase hex digest of some content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` hex characters, for log lines.
    pub fn short(&self, n: usize) -> &str {
        &self.0[..n.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = GuardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || hex::decode(&s).is_err() {
            return Err(GuardError::Malformed("fingerprint is not a hex digest"));
        }
        Ok(Self(s))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = GuardError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Why the metadata store is no longer trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TamperKind {
    /// The store exists but its signature file was removed.
    SignatureMissing,
    /// A signature exists without the store it describes.
    StoreMissing,
    /// The recomputed signature differs from the persisted one.
    SignatureMismatch,
    /// The store cannot be parsed or holds an invalid record.
    Unreadable,
}

impl fmt::Display for TamperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TamperKind::SignatureMissing => "signature file is missing",
            TamperKind::StoreMissing => "store file is missing but a signature exists",
            TamperKind::SignatureMismatch => "signature does not match store content",
            TamperKind::Unreadable => "store content is unreadable",
        };
        f.write_str(msg)
    }
}

/// Library error type (no panics for expected failures).
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("authentication failed: wrong password or corrupted ciphertext")]
    NotAuthenticated,
    #[error("integrity mismatch for {name}: expected {expected}, found {actual}")]
    IntegrityMismatch {
        name: String,
        expected: Fingerprint,
        actual: Fingerprint,
    },
    #[error("snapshot {} has {actual} bytes, source had {expected}", .snapshot.display())]
    SizeMismatch {
        snapshot: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("no snapshots found for {0}")]
    NoSnapshotsFound(String),
    #[error("no metadata stored for {0}")]
    MetadataMissing(String),
    #[error("metadata store tampering detected: {0}")]
    CriticalTamper(TamperKind),
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("OS random source unavailable: {0}")]
    RandomUnavailable(String),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("malformed data: {0}")]
    Malformed(&'static str),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported AEAD algorithm id {0}")]
    UnsupportedAlgorithm(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl GuardError {
    /// Attach a path to an I/O error, keeping not-found and permission failures distinct.
    pub fn io_at(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => GuardError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => GuardError::PermissionDenied(path.to_path_buf()),
            _ => GuardError::Io(err),
        }
    }

    /// Tamper and mismatch outcomes that must be surfaced as security alerts.
    pub fn is_security_alert(&self) -> bool {
        matches!(
            self,
            GuardError::CriticalTamper(_)
                | GuardError::IntegrityMismatch { .. }
                | GuardError::SizeMismatch { .. }
        )
    }

    /// Expected conditions the operator can fix by retrying with other input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GuardError::NotFound(_)
                | GuardError::NoSnapshotsFound(_)
                | GuardError::MetadataMissing(_)
                | GuardError::NotAuthenticated
                | GuardError::DestinationExists(_)
        )
    }
}

impl From<getrandom::Error> for GuardError {
    fn from(e: getrandom::Error) -> Self {
        GuardError::RandomUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

impl From<ciborium::de::Error<io::Error>> for GuardError {
    fn from(e: ciborium::de::Error<io::Error>) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for GuardError {
    fn from(e: ciborium::ser::Error<io::Error>) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_text_roundtrip() {
        let salt = Salt::from_bytes(vec![7u8; 16]);
        let back = Salt::from_text(&salt.to_text()).unwrap();
        assert_eq!(back, salt);
    }

    #[test]
    fn rng_failure_has_its_own_error() {
        let err = GuardError::from(getrandom::Error::UNSUPPORTED);
        assert!(matches!(err, GuardError::RandomUnavailable(_)));
        assert!(err.to_string().starts_with("OS random source unavailable"));
    }

    #[test]
    fn salt_rejects_garbage_text() {
        assert!(matches!(
            Salt::from_text("not base64 !!"),
            Err(GuardError::Malformed(_))
        ));
        assert!(Salt::from_text("").is_err());
    }

    #[test]
    fn fingerprint_parsing_normalizes_case() {
        let fp: Fingerprint = "ABCDEF01".parse().unwrap();
        assert_eq!(fp.as_str(), "abcdef01");
        assert!("xyz".parse::<Fingerprint>().is_err());
        assert!("abc".parse::<Fingerprint>().is_err(), "odd length");
    }

    #[test]
    fn derived_key_debug_is_redacted() {
        let key = DerivedKey::from_bytes([0x42; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "DerivedKey(<redacted>)");
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let p = Path::new("missing.txt");
        let nf = GuardError::io_at(io::Error::from(io::ErrorKind::NotFound), p);
        assert!(matches!(nf, GuardError::NotFound(_)));
        let pd = GuardError::io_at(io::Error::from(io::ErrorKind::PermissionDenied), p);
        assert!(matches!(pd, GuardError::PermissionDenied(_)));
        let other = GuardError::io_at(io::Error::other("disk on fire"), p);
        assert!(matches!(other, GuardError::Io(_)));
    }

    #[test]
    fn config_names_for_algorithms() {
        #[derive(Deserialize)]
        struct Wrapper {
            kdf: KdfAlg,
            aead: AeadAlg,
        }
        let p: Wrapper =
            serde_json::from_str(r#"{"kdf":"pbkdf2-sha256","aead":"aes256gcmsiv"}"#).unwrap();
        assert_eq!(p.kdf, KdfAlg::Pbkdf2Sha256);
        assert_eq!(p.aead, AeadAlg::Aes256GcmSiv);
    }
}
