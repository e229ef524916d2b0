//! Tamper-evident metadata store.
//!
//! Maps a protected file name to the salt its key was derived with and the
//! fingerprint of its plaintext. The whole map is persisted as pretty JSON of a
//! key-sorted map, next to a signature file holding the SHA-256 of exactly that
//! serialization. Every mutation rewrites both files.
//!
//! # Limitation
//!
//! The signature is a plain content hash, not a keyed MAC. It detects accidental
//! or naive edits of either file; anyone able to rewrite both files can compute a
//! matching signature.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alert::{Severity, log_event};
use crate::file::{new_temp_beside, parent_dir, sync_temp, write_all_atomic};
use crate::hash::{HashAlg, hash_bytes};
use crate::types::{Fingerprint, GuardError, Result, Salt, TamperKind};

/// Per-file metadata. Both fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataRecord {
    /// Base64 salt used to derive the file's key.
    pub salt: String,
    /// Fingerprint of the plaintext at secure time.
    pub hash: Fingerprint,
}

impl MetadataRecord {
    pub fn new(salt: &Salt, hash: Fingerprint) -> Self {
        Self {
            salt: salt.to_text(),
            hash,
        }
    }

    pub fn salt(&self) -> Result<Salt> {
        Salt::from_text(&self.salt)
    }

    pub fn validate(&self) -> Result<()> {
        self.salt().map(drop)
    }
}

type Records = BTreeMap<String, MetadataRecord>;

fn canonical_bytes(records: &Records) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(records)?)
}

fn signature_of(canonical: &[u8]) -> Fingerprint {
    hash_bytes(canonical, HashAlg::Sha256)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GuardError::io_at(e, path)),
    }
}

/// Read both files and decide whether their pair can be trusted.
fn read_verified(store_path: &Path, sig_path: &Path) -> Result<Records> {
    let store = read_optional(store_path)?;
    let sig = read_optional(sig_path)?;
    let (store, sig) = match (store, sig) {
        (None, None) => return Ok(Records::new()),
        (Some(_), None) => return Err(GuardError::CriticalTamper(TamperKind::SignatureMissing)),
        (None, Some(_)) => return Err(GuardError::CriticalTamper(TamperKind::StoreMissing)),
        (Some(store), Some(sig)) => (store, sig),
    };

    let records: Records = serde_json::from_slice(&store)
        .map_err(|_| GuardError::CriticalTamper(TamperKind::Unreadable))?;
    if records.values().any(|r| r.validate().is_err()) {
        return Err(GuardError::CriticalTamper(TamperKind::Unreadable));
    }

    let expected = signature_of(&canonical_bytes(&records)?);
    let persisted = std::str::from_utf8(&sig)
        .ok()
        .and_then(|s| s.parse::<Fingerprint>().ok());
    if persisted.as_ref() != Some(&expected) {
        return Err(GuardError::CriticalTamper(TamperKind::SignatureMismatch));
    }
    Ok(records)
}

/// Filename-keyed metadata with an integrity signature.
#[derive(Debug)]
pub struct MetadataStore {
    store_path: PathBuf,
    sig_path: PathBuf,
    records: Records,
}

impl MetadataStore {
    /// Load and verify the store.
    ///
    /// Neither file existing is a fresh, empty store.
    ///
    /// # Errors
    ///
    /// `CriticalTamper` when the pair of files cannot be trusted (logged as
    /// critical); `Io` / `PermissionDenied` when they cannot be read.
    pub fn load(store_path: impl Into<PathBuf>, sig_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        let sig_path = sig_path.into();
        let records = read_verified(&store_path, &sig_path).inspect_err(report_tamper)?;
        Ok(Self {
            store_path,
            sig_path,
            records,
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn signature_path(&self) -> &Path {
        &self.sig_path
    }

    /// Re-read the persisted files and check their signature.
    pub fn check_integrity(&self) -> Result<()> {
        read_verified(&self.store_path, &self.sig_path)
            .map(drop)
            .inspect_err(report_tamper)
    }

    /// `true` only if the persisted store is present-and-signed or legitimately empty.
    pub fn verify_integrity(&self) -> bool {
        self.check_integrity().is_ok()
    }

    pub fn get(&self, name: &str) -> Option<&MetadataRecord> {
        self.records.get(name)
    }

    /// Insert or overwrite the record for `name` and persist.
    ///
    /// On error the in-memory map is left as it was.
    pub fn put(&mut self, name: &str, record: MetadataRecord) -> Result<()> {
        record.validate()?;
        let mut next = self.records.clone();
        next.insert(name.to_owned(), record);
        self.persist(&next)?;
        self.records = next;
        log_event(Severity::Info, format!("metadata stored for {name}"));
        Ok(())
    }

    /// Remove the record for `name` and persist. Returns the removed record.
    pub fn remove(&mut self, name: &str) -> Result<Option<MetadataRecord>> {
        if !self.records.contains_key(name) {
            return Ok(None);
        }
        let mut next = self.records.clone();
        let removed = next.remove(name);
        self.persist(&next)?;
        self.records = next;
        log_event(Severity::Info, format!("metadata removed for {name}"));
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Write store and signature to temp files, then rename store, then signature.
    ///
    /// If the signature cannot be renamed into place, the previous store bytes are
    /// put back so both files keep describing the same version.
    fn persist(&self, records: &Records) -> Result<()> {
        let canonical = canonical_bytes(records)?;
        let signature = signature_of(&canonical);
        let previous = match fs::read(&self.store_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(GuardError::io_at(e, &self.store_path)),
        };

        for dir in [parent_dir(&self.store_path), parent_dir(&self.sig_path)] {
            fs::create_dir_all(dir).map_err(|e| GuardError::io_at(e, dir))?;
        }
        let mut store_tmp = new_temp_beside(&self.store_path)?;
        store_tmp.write_all(&canonical)?;
        sync_temp(&mut store_tmp)?;
        let mut sig_tmp = new_temp_beside(&self.sig_path)?;
        writeln!(sig_tmp, "{signature}")?;
        sync_temp(&mut sig_tmp)?;

        store_tmp
            .persist(&self.store_path)
            .map_err(|e| GuardError::io_at(e.error, &self.store_path))?;
        if let Err(e) = sig_tmp.persist(&self.sig_path) {
            let rollback = match &previous {
                Some(bytes) => write_all_atomic(&self.store_path, bytes, false),
                None => fs::remove_file(&self.store_path).map_err(GuardError::from),
            };
            if let Err(r) = rollback {
                log_event(
                    Severity::Critical,
                    format!(
                        "store {} no longer matches its signature: {r}",
                        self.store_path.display()
                    ),
                );
            }
            return Err(GuardError::io_at(e.error, &self.sig_path));
        }
        Ok(())
    }
}

fn report_tamper(err: &GuardError) {
    if let GuardError::CriticalTamper(kind) = err {
        log_event(
            Severity::Critical,
            format!("metadata store integrity check failed: {kind}"),
        );
    }
}
