//! Runtime configuration loaded from a TOML file.
//!
//! Every section and key is optional; missing values fall back to defaults.
//! Relative paths resolve against `paths.base_dir`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alert::{Severity, log_event};
use crate::hash::HashAlg;
use crate::kdf::validate_params;
use crate::streaming::validate_chunk_size_for_streaming;
use crate::types::{CipherOptions, DEFAULT_BUFFER_SIZE, GuardError, KdfParams, Result};

/// Top-level configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub paths: PathsConfig,
    pub kdf: KdfParams,
    pub cipher: CipherOptions,
    pub hash: HashConfig,
    pub backup: BackupConfig,
    pub log: LogConfig,
}

/// Where persistent state lives. Relative entries are resolved against `base_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Metadata store file name inside `data_dir`
    pub store_file: String,
    /// Store signature file name inside `data_dir`
    pub signature_file: String,
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
            store_file: "file_db.json".into(),
            signature_file: ".db.sig".into(),
            backup_dir: PathBuf::from(".backups"),
            log_dir: PathBuf::from("logs"),
            log_file: "security.log".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    pub algorithm: HashAlg,
    /// Read buffer for streaming digests
    pub buffer_size: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlg::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub snapshot_suffix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            snapshot_suffix: "bak".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from `path`, or defaults when `path` is `None`.
    ///
    /// A path that does not exist is not an error: defaults are used and a warning
    /// is logged. The result is validated either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(p) => match fs::read_to_string(p) {
                Ok(text) => Self::from_toml(&text)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log_event(
                        Severity::Warning,
                        format!("config file {} not found, using defaults", p.display()),
                    );
                    Self::default()
                }
                Err(e) => return Err(GuardError::io_at(e, p)),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GuardError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GuardError::Config(e.to_string()))
    }

    /// Reject settings that would weaken protection or cannot work.
    pub fn validate(&self) -> Result<()> {
        validate_params(&self.kdf)?;
        if self.hash.buffer_size == 0 {
            return Err(GuardError::Config("hash.buffer_size must be non-zero".into()));
        }
        validate_chunk_size_for_streaming(self.cipher.chunk_size)
            .map_err(|e| GuardError::Config(format!("cipher.chunk_size: {e}")))?;
        for (key, value) in [
            ("cipher.encrypted_suffix", &self.cipher.encrypted_suffix),
            ("backup.snapshot_suffix", &self.backup.snapshot_suffix),
            ("paths.store_file", &self.paths.store_file),
            ("paths.signature_file", &self.paths.signature_file),
            ("paths.log_file", &self.paths.log_file),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(GuardError::Config(format!(
                    "{key} must be a non-empty file name"
                )));
            }
        }
        if self.paths.store_file == self.paths.signature_file {
            return Err(GuardError::Config(
                "store and signature must be different files".into(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        self.paths.base_dir.join(p)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.paths.data_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(&self.paths.store_file)
    }

    pub fn signature_path(&self) -> PathBuf {
        self.data_dir().join(&self.paths.signature_file)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.paths.backup_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.paths.log_dir).join(&self.paths.log_file)
    }

    /// Same configuration rooted at `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.paths.base_dir = base_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AeadAlg, KdfAlg};

    #[test]
    fn empty_file_gives_defaults() {
        let config = GuardConfig::from_toml("").unwrap();
        assert_eq!(config, GuardConfig::default());
        assert_eq!(config.kdf.iterations, 480_000);
        assert_eq!(config.cipher.encrypted_suffix, "enc");
        assert_eq!(config.backup.snapshot_suffix, "bak");
        assert_eq!(config.store_path(), Path::new("./data/file_db.json"));
        assert_eq!(config.signature_path(), Path::new("./data/.db.sig"));
        assert_eq!(config.log_path(), Path::new("./logs/security.log"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let text = r#"
            [paths]
            base_dir = "/srv/guard"

            [kdf]
            algorithm = "argon2id"

            [cipher]
            algorithm = "aes256gcmsiv"

            [hash]
            algorithm = "blake3"
        "#;
        let config = GuardConfig::from_toml(text).unwrap();
        assert_eq!(config.kdf.alg, KdfAlg::Argon2id);
        assert_eq!(config.kdf.salt_len, 16);
        assert_eq!(config.cipher.alg, AeadAlg::Aes256GcmSiv);
        assert_eq!(config.hash.algorithm, HashAlg::Blake3);
        assert_eq!(config.hash.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.backup_dir(), Path::new("/srv/guard/.backups"));
    }

    #[test]
    fn serialize_roundtrip() {
        let config = GuardConfig::default();
        let parsed = GuardConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn weak_or_broken_settings_are_rejected() {
        let mut weak = GuardConfig::default();
        weak.kdf.iterations = 1_000;
        assert!(weak.validate().is_err());

        let mut no_suffix = GuardConfig::default();
        no_suffix.cipher.encrypted_suffix.clear();
        assert!(matches!(no_suffix.validate(), Err(GuardError::Config(_))));

        let mut zero_buf = GuardConfig::default();
        zero_buf.hash.buffer_size = 0;
        assert!(matches!(zero_buf.validate(), Err(GuardError::Config(_))));

        let mut same = GuardConfig::default();
        same.paths.signature_file = same.paths.store_file.clone();
        assert!(matches!(same.validate(), Err(GuardError::Config(_))));

        assert!(matches!(
            GuardConfig::from_toml("[kdf]\nalgorithm = \"md5\""),
            Err(GuardError::Config(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, GuardConfig::default());
    }
}
