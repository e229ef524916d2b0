#![forbid(unsafe_code)]
//! # file_guard: backups, fingerprints and encryption for local files.
//!
//! `file_guard` protects a single user's files against loss, undetected
//! modification and disclosure, and detects tampering with its own bookkeeping.
//!
//! ## Features
//! - **Password-based key derivation** (PBKDF2-HMAC-SHA256 by default, Argon2id optional)
//! - **Authenticated file encryption** (XChaCha20-Poly1305, AES-256-GCM-SIV) with
//!   atomic replacement
//! - **Streaming encryption** for large files (constant memory usage)
//! - **Content fingerprints** with SHA-256, SHA-512, SHA3-256 and BLAKE3
//! - **Versioned backups** with strictly ordered snapshot names
//! - **Tamper-evident metadata store** binding each file to its salt and fingerprint
//!
//! ## Example: secure and unlock a file
//! ```no_run
//! use file_guard::{FileGuard, GuardConfig};
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! let mut guard = FileGuard::open(GuardConfig::default()).unwrap();
//! let password = SecretString::new("correct horse".into());
//!
//! let report = guard.secure_file(Path::new("notes.txt"), &password).unwrap();
//! println!("encrypted to {}", report.artifact.display());
//!
//! let unlocked = guard.unlock_file(&report.artifact, &password).unwrap();
//! assert!(unlocked.verification.matched);
//! ```
//!
//! ## Example: use the engines directly
//! ```no_run
//! use file_guard::{
//!     CipherOptions, HashAlg, KdfParams, derive_key, encrypt_file, generate_salt, hash_file,
//! };
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! let path = Path::new("report.pdf");
//! let fingerprint = hash_file(path, HashAlg::Sha256).unwrap();
//! let params = KdfParams::default();
//! let salt = generate_salt(params.salt_len).unwrap();
//! let key = derive_key(&SecretString::new("pw".into()), &salt, &params).unwrap();
//! let artifact = encrypt_file(path, &key, &CipherOptions::default()).unwrap();
//! println!("{fingerprint} -> {}", artifact.display());
//! ```
//!
//! Safety notes
//! - The crate is not audited or reviewed! Protects data at rest.
//! - Does not defend against compromised hosts or side channels.
//! - The metadata store signature is a plain SHA-256 of its content: it detects
//!   corruption, not a deliberate rewrite of both store files.

mod alert;
mod backup;
mod config;
mod crypto;
mod file;
mod format;
mod guard;
mod hash;
mod kdf;
mod store;
mod streaming;
mod types;

// Re-export public API from modules
pub use alert::{Severity, log_event};
pub use backup::{BackupManager, Restored, Snapshot, SnapshotStamp};
pub use config::{BackupConfig, GuardConfig, HashConfig, LogConfig, PathsConfig};
pub use file::{
    copy_atomic, decrypt_bytes, decrypt_file, decrypted_path, encrypt_bytes, encrypt_file,
    encrypt_file_with_kdf, encrypted_path, read_artifact_header, write_all_atomic,
};
pub use format::{ArtifactHeader, StreamInfo};
pub use guard::{FileGuard, SecureReport, UnlockReport};
pub use hash::{
    HashAlg, Verification, hash_bytes, hash_file, hash_file_with_buffer, hash_reader,
    verify_file, verify_reader,
};
pub use kdf::{
    MAX_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS, MIN_SALT_LENGTH, derive_key, generate_salt,
    validate_params,
};
pub use store::{MetadataRecord, MetadataStore};
pub use streaming::validate_chunk_size_for_streaming;
pub use types::*;
