//! Versioned backups: timestamped snapshots per file name.
//!
//! Snapshots are named `{file name}.{stamp}.{suffix}` inside the backup directory,
//! where `stamp` is a UTC timestamp with microsecond resolution
//! (`20261019T101530.123456Z`) optionally followed by `-N`. The sequence number is
//! used when the clock has not moved past the newest existing snapshot, so a new
//! snapshot always sorts strictly after every older one.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

use crate::alert::{Severity, log_event};
use crate::file::copy_atomic;
use crate::types::{GuardError, Result};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const STAMP_PARSE_FORMAT: &str = "%Y%m%dT%H%M%S%.fZ";

/// How many times a colliding snapshot name is retried with a bumped sequence.
const MAX_NAME_ATTEMPTS: u32 = 64;

/// Capture time of a snapshot. Ordered by time, then by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotStamp {
    pub taken_at: DateTime<Utc>,
    pub seq: u32,
}

impl Ord for SnapshotStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.taken_at
            .cmp(&other.taken_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SnapshotStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl SnapshotStamp {
    fn now() -> Self {
        Self {
            taken_at: Utc::now().trunc_subsecs(6),
            seq: 0,
        }
    }

    fn successor(&self) -> Self {
        Self {
            taken_at: self.taken_at,
            seq: self.seq + 1,
        }
    }

    /// Parse the stamp portion of a snapshot name.
    pub fn parse(s: &str) -> Option<Self> {
        let (time, seq) = match s.split_once('-') {
            Some((time, seq)) => {
                if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                (time, seq.parse().ok()?)
            }
            None => (s, 0),
        };
        let taken_at = NaiveDateTime::parse_from_str(time, STAMP_PARSE_FORMAT)
            .ok()?
            .and_utc();
        Some(Self { taken_at, seq })
    }
}

impl fmt::Display for SnapshotStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.taken_at.format(STAMP_FORMAT))?;
        if self.seq > 0 {
            write!(f, "-{}", self.seq)?;
        }
        Ok(())
    }
}

/// One immutable snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    /// File name of the protected file this snapshot was taken from.
    pub source_name: String,
    pub stamp: SnapshotStamp,
    pub size: u64,
}

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub target: PathBuf,
    pub snapshot: Snapshot,
    pub bytes: u64,
}

/// Keeps snapshots for protected files in a single directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    suffix: String,
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or(GuardError::Invalid("path has no UTF-8 file name"))
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, name: &str, stamp: &SnapshotStamp) -> PathBuf {
        self.dir.join(format!("{name}.{stamp}.{}", self.suffix))
    }

    /// Copy the current bytes of `source` into a new snapshot.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `source` is missing
    /// - `SizeMismatch` if the persisted snapshot's size differs from the source;
    ///   the snapshot is kept for inspection
    pub fn backup(&self, source: &Path) -> Result<Snapshot> {
        let meta = fs::metadata(source).map_err(|e| GuardError::io_at(e, source))?;
        if !meta.is_file() {
            return Err(GuardError::NotFound(source.to_path_buf()));
        }
        let name = file_name_of(source)?;
        fs::create_dir_all(&self.dir).map_err(|e| GuardError::io_at(e, &self.dir))?;

        let mut stamp = SnapshotStamp::now();
        if let Some(newest) = self.list_versions(source)?.first() {
            if newest.stamp >= stamp {
                stamp = newest.stamp.successor();
            }
        }

        let mut attempts = 0;
        let (path, copied) = loop {
            let path = self.snapshot_path(&name, &stamp);
            match copy_atomic(source, &path, false) {
                Ok(copied) => break (path, copied),
                Err(GuardError::DestinationExists(_)) if attempts < MAX_NAME_ATTEMPTS => {
                    attempts += 1;
                    stamp = stamp.successor();
                }
                Err(e) => {
                    log_event(Severity::Error, format!("backup of {name} failed: {e}"));
                    return Err(e);
                }
            }
        };

        let actual = fs::metadata(&path)?.len();
        check_snapshot_size(&name, &path, meta.len(), copied, actual)?;

        log_event(
            Severity::Info,
            format!("verified backup of {name} created at {}", path.display()),
        );
        Ok(Snapshot {
            path,
            source_name: name,
            stamp,
            size: actual,
        })
    }

    /// All snapshots of `target`'s file name, most recent first.
    ///
    /// A missing backup directory simply means no snapshots yet.
    pub fn list_versions(&self, target: &Path) -> Result<Vec<Snapshot>> {
        let name = file_name_of(target)?;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuardError::io_at(e, &self.dir)),
        };

        let prefix = format!("{name}.");
        let suffix = format!(".{}", self.suffix);
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stamp) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
                .and_then(SnapshotStamp::parse)
            else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            found.push(Snapshot {
                path: entry.path(),
                source_name: name.clone(),
                stamp,
                size: meta.len(),
            });
        }
        found.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        Ok(found)
    }

    /// Newest snapshot of `target`'s file name.
    pub fn latest(&self, target: &Path) -> Result<Snapshot> {
        let name = file_name_of(target)?;
        self.list_versions(target)?
            .into_iter()
            .next()
            .ok_or(GuardError::NoSnapshotsFound(name))
    }

    /// Copy the newest snapshot over `target`, replacing whatever is there.
    pub fn restore_latest(&self, target: &Path) -> Result<Restored> {
        let snapshot = match self.latest(target) {
            Ok(s) => s,
            Err(e @ GuardError::NoSnapshotsFound(_)) => {
                log_event(Severity::Warning, format!("restore skipped: {e}"));
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let bytes = copy_atomic(&snapshot.path, target, true).inspect_err(|e| {
            log_event(
                Severity::Error,
                format!("restore of {} failed: {e}", snapshot.source_name),
            )
        })?;
        log_event(
            Severity::Info,
            format!(
                "{} restored from snapshot {}",
                snapshot.source_name, snapshot.stamp
            ),
        );
        Ok(Restored {
            target: target.to_path_buf(),
            snapshot,
            bytes,
        })
    }
}

/// Compare a persisted snapshot with its source. The snapshot stays on disk either way.
fn check_snapshot_size(
    name: &str,
    snapshot: &Path,
    expected: u64,
    copied: u64,
    actual: u64,
) -> Result<()> {
    if actual == expected && copied == expected {
        return Ok(());
    }
    log_event(
        Severity::Warning,
        format!("backup of {name} has size mismatch ({actual} vs {expected} bytes)"),
    );
    Err(GuardError::SizeMismatch {
        snapshot: snapshot.to_path_buf(),
        expected,
        actual,
    })
}
