//! Tracking state store.
//!
//! The tracking file is the single source of truth for which migrations
//! have been applied and in what order:
//!
//! ```json
//! {
//!   "applied": [
//!     {
//!       "version": 1,
//!       "name": "move_alias",
//!       "description": "...",
//!       "applied_at": "2026-01-02T03:04:05Z"
//!     }
//!   ]
//! }
//! ```
//!
//! A missing file means nothing has been applied. A file that exists but
//! cannot be parsed is an error: the store never falls back to an empty
//! state, since that would re-apply everything on the next `up`.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migration::MigrationDefinition;

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

impl AppliedRecord {
    pub fn new(definition: &MigrationDefinition, applied_at: DateTime<Utc>) -> Self {
        Self {
            version: definition.version,
            name: definition.name.clone(),
            description: definition.description.clone(),
            applied_at,
        }
    }
}

/// Applied migrations in application order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingState {
    #[serde(default)]
    pub applied: Vec<AppliedRecord>,
}

impl TrackingState {
    /// The most recently applied record ("current version")
    pub fn current(&self) -> Option<&AppliedRecord> {
        self.applied.last()
    }

    pub fn contains(&self, version: u32) -> bool {
        self.applied.iter().any(|r| r.version == version)
    }

    pub fn find(&self, version: u32) -> Option<&AppliedRecord> {
        self.applied.iter().find(|r| r.version == version)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Applied versions in application order
    pub fn versions(&self) -> Vec<u32> {
        self.applied.iter().map(|r| r.version).collect()
    }

    /// Append a record.
    ///
    /// # Errors
    ///
    /// `AlreadyRecorded` (and nothing changes) if the version is present.
    pub fn record(&mut self, record: AppliedRecord) -> Result<()> {
        if self.contains(record.version) {
            return Err(MigrateError::AlreadyRecorded {
                version: record.version,
            });
        }
        self.applied.push(record);
        Ok(())
    }

    /// Remove and return the most recently applied record
    pub fn pop_last(&mut self) -> Option<AppliedRecord> {
        self.applied.pop()
    }

    /// First version that appears more than once, if any
    fn first_duplicate(&self) -> Option<u32> {
        let mut seen = HashSet::new();
        self.applied
            .iter()
            .map(|r| r.version)
            .find(|v| !seen.insert(*v))
    }
}

/// JSON file holding the tracking state
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state (empty if the file does not exist yet).
    ///
    /// # Errors
    ///
    /// `Persistence` if the file cannot be read, is not valid tracking JSON,
    /// or lists a version twice.
    pub fn load(&self) -> Result<TrackingState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No tracking state at {:?}, starting empty", self.path);
                return Ok(TrackingState::default());
            }
            Err(e) => return Err(MigrateError::persistence(&self.path, e)),
        };

        let state: TrackingState = serde_json::from_str(&content)
            .map_err(|e| MigrateError::persistence(&self.path, format!("malformed JSON: {}", e)))?;

        if let Some(version) = state.first_duplicate() {
            return Err(MigrateError::persistence(
                &self.path,
                format!("version {:04} is recorded more than once", version),
            ));
        }

        debug!("Loaded {} applied record(s) from {:?}", state.len(), self.path);
        Ok(state)
    }

    /// Persist the state atomically.
    ///
    /// The JSON is written to a temporary file in the same directory,
    /// flushed to disk, then renamed over the target. Readers see either
    /// the old file or the new one, never a partial write.
    pub fn save(&self, state: &TrackingState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| MigrateError::persistence(&self.path, e))?;

        let mut json = serde_json::to_string_pretty(state)
            .map_err(|e| MigrateError::persistence(&self.path, e))?;
        json.push('\n');

        let mut tmp =
            NamedTempFile::new_in(&dir).map_err(|e| MigrateError::persistence(&self.path, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| MigrateError::persistence(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| MigrateError::persistence(&self.path, e.error))?;

        debug!("Saved {} applied record(s) to {:?}", state.len(), self.path);
        Ok(())
    }
}
