//! Orchestrator: sequences the engines into user-level operations.
//!
//! Secure: backup → hash → salt + derive key → encrypt → store metadata.
//! Unlock: lookup metadata → read KDF settings from the artifact → derive key →
//! decrypt → verify hash.
//!
//! Every operation first re-checks the metadata store; a tampered store stops
//! the operation with `CriticalTamper` before any file is touched.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::alert::{Severity, log_event};
use crate::backup::{BackupManager, Restored, Snapshot};
use crate::config::GuardConfig;
use crate::file::{
    decrypt_file, decrypted_path, encrypt_file_with_kdf, encrypted_path, read_artifact_header,
};
use crate::hash::{Verification, hash_file_with_buffer, verify_reader};
use crate::kdf::{derive_key, generate_salt};
use crate::store::{MetadataRecord, MetadataStore};
use crate::types::{Fingerprint, GuardError, Result};

/// Outcome of [`FileGuard::secure_file`].
#[derive(Debug, Clone)]
pub struct SecureReport {
    pub artifact: PathBuf,
    pub snapshot: Snapshot,
    pub fingerprint: Fingerprint,
}

/// Outcome of [`FileGuard::unlock_file`].
///
/// The plaintext is back on disk either way; `verification.matched == false`
/// means it differs from what was secured.
#[derive(Debug, Clone)]
pub struct UnlockReport {
    pub plaintext: PathBuf,
    pub verification: Verification,
}

/// Plaintext path, artifact path and the file name metadata is keyed by.
struct Target {
    plain: PathBuf,
    artifact: PathBuf,
    name: String,
}

pub struct FileGuard {
    config: GuardConfig,
    store: MetadataStore,
    backups: BackupManager,
}

impl FileGuard {
    /// Validate `config` and load the metadata store it points at.
    ///
    /// # Errors
    ///
    /// `CriticalTamper` if the store fails its integrity check.
    pub fn open(config: GuardConfig) -> Result<Self> {
        config.validate()?;
        let store = MetadataStore::load(config.store_path(), config.signature_path())?;
        let suffix = config.backup.snapshot_suffix.clone();
        let backups = BackupManager::new(config.backup_dir(), suffix);
        Ok(Self {
            config,
            store,
            backups,
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Re-verify the persisted metadata store.
    pub fn check_store(&self) -> Result<()> {
        self.store.check_integrity()
    }

    /// Accept either the plaintext path or the artifact path.
    fn target(&self, path: &Path) -> Result<Target> {
        let suffix = &self.config.cipher.encrypted_suffix;
        let (plain, artifact) = match decrypted_path(path, suffix) {
            Ok(plain) => (plain, path.to_path_buf()),
            Err(_) => (path.to_path_buf(), encrypted_path(path, suffix)),
        };
        let name = plain
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or(GuardError::Invalid("path has no UTF-8 file name"))?;
        Ok(Target {
            plain,
            artifact,
            name,
        })
    }

    fn record_for(&self, name: &str) -> Result<&MetadataRecord> {
        self.store
            .get(name)
            .ok_or_else(|| GuardError::MetadataMissing(name.to_owned()))
    }

    /// Snapshot, fingerprint and encrypt `path`, then record its metadata.
    ///
    /// If recording the metadata fails the artifact is decrypted back.
    pub fn secure_file(&mut self, path: &Path, password: &SecretString) -> Result<SecureReport> {
        self.check_store()?;
        let target = self.target(path)?;
        if target.plain != path {
            return Err(GuardError::Invalid("file is already encrypted"));
        }

        let snapshot = self.backups.backup(path)?;
        let fingerprint =
            hash_file_with_buffer(path, self.config.hash.algorithm, self.config.hash.buffer_size)?;
        let salt = generate_salt(self.config.kdf.salt_len)?;
        let key = derive_key(password, &salt, &self.config.kdf)?;
        let kdf = Some(self.config.kdf);
        let artifact = encrypt_file_with_kdf(path, &key, &self.config.cipher, kdf)?;

        let record = MetadataRecord::new(&salt, fingerprint.clone());
        if let Err(e) = self.store.put(&target.name, record) {
            log_event(
                Severity::Error,
                format!("metadata for {} not recorded ({e}), reverting encryption", target.name),
            );
            if let Err(rollback) = decrypt_file(&artifact, &key, &self.config.cipher) {
                log_event(
                    Severity::Critical,
                    format!(
                        "could not revert {}: {rollback}; snapshot at {}",
                        artifact.display(),
                        snapshot.path.display()
                    ),
                );
            }
            return Err(e);
        }

        log_event(
            Severity::Info,
            format!("{} secured as {}", target.name, artifact.display()),
        );
        Ok(SecureReport {
            artifact,
            snapshot,
            fingerprint,
        })
    }

    /// Decrypt a secured file and verify it against the recorded fingerprint.
    ///
    /// The key is derived with the KDF settings recorded in the artifact, so
    /// changing `[kdf]` only affects files secured afterwards. A wrong password
    /// leaves the artifact in place and returns `NotAuthenticated`.
    pub fn unlock_file(&self, path: &Path, password: &SecretString) -> Result<UnlockReport> {
        self.check_store()?;
        let target = self.target(path)?;
        let record = self.record_for(&target.name)?;
        let expected = record.hash.clone();
        let salt = record.salt()?;
        let kdf = read_artifact_header(&target.artifact)?
            .kdf
            .unwrap_or(self.config.kdf);
        let key = derive_key(password, &salt, &kdf)?;

        let cipher = &self.config.cipher;
        let plaintext = decrypt_file(&target.artifact, &key, cipher).inspect_err(|e| {
            if matches!(e, GuardError::NotAuthenticated) {
                log_event(
                    Severity::Warning,
                    format!(
                        "decryption of {} rejected: wrong password or corrupted file",
                        target.name
                    ),
                );
            }
        })?;

        let verification = self.verify_path(&plaintext, &target.name, &expected)?;
        if verification.matched {
            log_event(Severity::Info, format!("{} unlocked", target.name));
        }
        Ok(UnlockReport {
            plaintext,
            verification,
        })
    }

    fn verify_path(&self, path: &Path, name: &str, expected: &Fingerprint) -> Result<Verification> {
        let file = std::fs::File::open(path).map_err(|e| GuardError::io_at(e, path))?;
        let verification = verify_reader(
            file,
            name,
            expected,
            self.config.hash.algorithm,
            self.config.hash.buffer_size,
        )?;
        if !verification.matched {
            log_event(Severity::Critical, verification.detail());
        }
        Ok(verification)
    }

    /// Compare the plaintext on disk with its recorded fingerprint.
    pub fn verify(&self, path: &Path) -> Result<Verification> {
        self.check_store()?;
        let target = self.target(path)?;
        let expected = self.record_for(&target.name)?.hash.clone();
        self.verify_path(&target.plain, &target.name, &expected)
    }

    /// Take a snapshot without encrypting.
    pub fn backup(&self, path: &Path) -> Result<Snapshot> {
        self.backups.backup(path)
    }

    pub fn versions(&self, path: &Path) -> Result<Vec<Snapshot>> {
        let target = self.target(path)?;
        self.backups.list_versions(&target.plain)
    }

    /// Overwrite the plaintext path with the newest snapshot.
    ///
    /// Refused while the file is secured: plaintext and artifact never coexist.
    pub fn restore(&self, path: &Path) -> Result<Restored> {
        let target = self.target(path)?;
        if target.artifact.exists() {
            log_event(
                Severity::Warning,
                format!("restore of {} refused: {} exists", target.name, target.artifact.display()),
            );
            return Err(GuardError::Invalid("file is secured; unlock it before restoring"));
        }
        self.backups.restore_latest(&target.plain)
    }

    /// Forget the metadata of a file. Returns whether a record existed.
    pub fn purge(&mut self, path: &Path) -> Result<bool> {
        self.check_store()?;
        let target = self.target(path)?;
        let removed = self.store.remove(&target.name)?.is_some();
        if removed {
            log_event(Severity::Warning, format!("metadata for {} purged", target.name));
        }
        Ok(removed)
    }
}
