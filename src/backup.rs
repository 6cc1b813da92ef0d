//! Backup of the live terraform state before a batch.
//!
//! Best effort: a failed backup is reported but never stops the batch.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::{info, warn};

/// Result of a backup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// There was no live state file to copy
    NoLiveState,
    /// State copied verbatim to this path
    Created(PathBuf),
    /// Copy failed; the batch continues without a safety net
    Failed(String),
}

/// Copies the live state file to a timestamped sibling
#[derive(Debug, Clone)]
pub struct BackupGuard {
    tfstate: PathBuf,
    backup_dir: PathBuf,
}

impl BackupGuard {
    pub fn new(tfstate: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            tfstate: tfstate.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Copy the live state if it exists.
    ///
    /// The file is named `<state file>.backup_<YYYYmmdd_HHMMSS>`; if that
    /// name is taken (two batches in the same second) a `_N` suffix is
    /// added rather than overwriting an older backup.
    pub fn snapshot(&self, now: NaiveDateTime) -> BackupOutcome {
        if !self.tfstate.is_file() {
            info!("No live state at {:?}, skipping backup", self.tfstate);
            return BackupOutcome::NoLiveState;
        }

        match self.copy_to_fresh_path(now) {
            Ok(path) => {
                info!("State backed up to {:?}", path);
                BackupOutcome::Created(path)
            }
            Err(e) => {
                warn!("Backup of {:?} failed: {}", self.tfstate, e);
                BackupOutcome::Failed(e.to_string())
            }
        }
    }

    fn copy_to_fresh_path(&self, now: NaiveDateTime) -> io::Result<PathBuf> {
        let file_name = self
            .tfstate
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "terraform.tfstate".to_string());
        let stem = format!("{}.backup_{}", file_name, now.format("%Y%m%d_%H%M%S"));

        fs::create_dir_all(&self.backup_dir)?;
        let contents = fs::read(&self.tfstate)?;

        for attempt in 0..100u32 {
            let name = match attempt {
                0 => stem.clone(),
                n => format!("{}_{}", stem, n),
            };
            let path = self.backup_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    io::Write::write_all(&mut file, &contents)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("too many backups named {}*", stem),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn test_no_live_state() {
        let dir = TempDir::new().unwrap();
        let guard = BackupGuard::new(dir.path().join("terraform.tfstate"), dir.path());
        assert_eq!(guard.snapshot(at(9, 0, 0)), BackupOutcome::NoLiveState);
    }

    #[test]
    fn test_copies_verbatim_with_timestamp() {
        let dir = TempDir::new().unwrap();
        let tfstate = dir.path().join("terraform.tfstate");
        fs::write(&tfstate, b"{\"version\": 4, \"serial\": 17}").unwrap();

        let guard = BackupGuard::new(&tfstate, dir.path().join("backups"));
        let outcome = guard.snapshot(at(14, 3, 9));

        let expected = dir
            .path()
            .join("backups/terraform.tfstate.backup_20261018_140309");
        assert_eq!(outcome, BackupOutcome::Created(expected.clone()));
        assert_eq!(fs::read(expected).unwrap(), fs::read(&tfstate).unwrap());
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let tfstate = dir.path().join("terraform.tfstate");
        fs::write(&tfstate, b"first").unwrap();
        let guard = BackupGuard::new(&tfstate, dir.path());

        let first = guard.snapshot(at(1, 2, 3));
        fs::write(&tfstate, b"second").unwrap();
        let second = guard.snapshot(at(1, 2, 3));

        let (BackupOutcome::Created(a), BackupOutcome::Created(b)) = (first, second) else {
            panic!("both backups should be created");
        };
        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with("_1"));
        assert_eq!(fs::read(a).unwrap(), b"first");
        assert_eq!(fs::read(b).unwrap(), b"second");
    }

    #[test]
    fn test_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let tfstate = dir.path().join("terraform.tfstate");
        fs::write(&tfstate, b"{}").unwrap();
        // A regular file where the backup directory should be
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let guard = BackupGuard::new(&tfstate, &blocker);
        assert!(matches!(guard.snapshot(at(0, 0, 0)), BackupOutcome::Failed(_)));
    }
}
