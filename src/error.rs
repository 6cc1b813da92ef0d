//! Error handling module for tfmigrate
//!
//! Every failure the migration engine can surface is a variant of
//! [`MigrateError`]. Errors are never retried; they carry enough context
//! (version, command, path) for the operator to fix things by hand.

use std::path::PathBuf;
use thiserror::Error;

use crate::command::CommandError;
use crate::executor::ExecutionError;
use crate::migration::{Direction, PhaseTransitionError};

/// Main error type for tfmigrate
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Two migration units registered the same version
    #[error("Duplicate migration version {version:04}: already registered")]
    DuplicateVersion { version: u32 },

    /// Version 0 is reserved for "nothing applied"
    #[error("Invalid migration version 0: versions start at 1")]
    InvalidVersion,

    /// Requested version has no definition in the registry
    #[error("Migration {version:04} is not registered")]
    NotFound { version: u32 },

    /// A factory produced a definition carrying a different version
    #[error("Migration registered as {registered:04} reports version {reported:04}")]
    VersionMismatch { registered: u32, reported: u32 },

    /// Malformed command definition (caught before invocation)
    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),

    /// External tool failed or could not be started
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Tracking state unreadable or unwritable
    #[error("Tracking state error ({}): {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Tracking state records a version the registry does not know
    #[error(
        "Tracking state records migration {version:04} ({name}) but no such migration is registered"
    )]
    UnknownAppliedVersion { version: u32, name: String },

    /// Illegal per-migration phase transition
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseTransitionError),

    /// One step of a batch failed; earlier steps stay recorded
    #[error(
        "Migration {version:04} ({name}) failed during {direction} at command {command}: {source}"
    )]
    StepFailed {
        version: u32,
        name: String,
        direction: Direction,
        /// 1-based index of the failing command (0 when the failure happened
        /// before any command ran)
        command: usize,
        /// Versions completed and persisted earlier in the same batch
        completed: Vec<u32>,
        #[source]
        source: Box<MigrateError>,
    },

    /// A migration's commands ran but the tracking state was not updated
    #[error(
        "Migration {version:04} ({name}) ran during {direction} but could not be recorded: {source}"
    )]
    RecordNotSaved {
        version: u32,
        name: String,
        direction: Direction,
        /// Versions completed and persisted earlier in the same batch
        completed: Vec<u32>,
        #[source]
        source: Box<MigrateError>,
    },

    /// The version is already present in the tracking state
    #[error("Migration {version:04} is already recorded as applied")]
    AlreadyRecorded { version: u32 },

    /// IO errors outside the tracking state (backups, scaffolding)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tfmigrate operations
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Create a persistence error for the given tracking state path
    pub fn persistence(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Versions that were completed before this error interrupted a batch.
    pub fn completed_versions(&self) -> &[u32] {
        match self {
            Self::StepFailed { completed, .. } | Self::RecordNotSaved { completed, .. } => {
                completed
            }
            _ => &[],
        }
    }

    /// True when the tool may have left the external state half-migrated
    /// and the operator has to look at it.
    ///
    /// A persistence failure counts: the commands of the last migration may
    /// have run without their record being written.
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(
            self,
            Self::StepFailed { .. } | Self::RecordNotSaved { .. } | Self::Persistence { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::DuplicateVersion { version: 3 };
        assert_eq!(
            err.to_string(),
            "Duplicate migration version 0003: already registered"
        );

        let err = MigrateError::NotFound { version: 12 };
        assert_eq!(err.to_string(), "Migration 0012 is not registered");
    }

    #[test]
    fn test_persistence_error_names_path() {
        let err = MigrateError::persistence("/tmp/state.json", "expected value at line 1");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/state.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MigrateError = io_err.into();
        assert!(matches!(err, MigrateError::Io(_)));
    }

    #[test]
    fn test_step_failed_exposes_completed_versions() {
        let err = MigrateError::StepFailed {
            version: 2,
            name: "split_vpc".to_string(),
            direction: Direction::Up,
            command: 2,
            completed: vec![1],
            source: Box::new(MigrateError::NotFound { version: 2 }),
        };
        assert_eq!(err.completed_versions(), &[1]);
        assert!(err.needs_manual_intervention());
        assert!(err.to_string().contains("0002 (split_vpc) failed during up at command 2"));

        let not_found = MigrateError::NotFound { version: 4 };
        assert!(not_found.completed_versions().is_empty());
        assert!(!not_found.needs_manual_intervention());
        assert!(MigrateError::persistence("s.json", "disk full").needs_manual_intervention());
    }

    #[test]
    fn test_record_not_saved_names_the_migration() {
        let err = MigrateError::RecordNotSaved {
            version: 2,
            name: "split_vpc".to_string(),
            direction: Direction::Down,
            completed: vec![3],
            source: Box::new(MigrateError::persistence("s.json", "read-only file system")),
        };
        assert_eq!(err.completed_versions(), &[3]);
        assert!(err.needs_manual_intervention());
        let msg = err.to_string();
        assert!(msg.starts_with("Migration 0002 (split_vpc) ran during down but could not be"));
        assert!(msg.contains("s.json"));
    }
}
