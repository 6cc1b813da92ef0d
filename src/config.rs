//! Tool configuration.
//!
//! Settings come from three layers, later ones winning:
//! built-in defaults, an optional JSON file (`tfmigrate.json` in the working
//! directory, or `--config <file>`), then command-line flags.
//!
//! ```json
//! {
//!   "state_file": "migrations/.migration_state.json",
//!   "migrations_dir": "src/migrations",
//!   "tfstate": "terraform.tfstate",
//!   "backup_dir": ".",
//!   "terraform_bin": "terraform",
//!   "working_dir": null
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up automatically when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "tfmigrate.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateConfig {
    /// Tracking state file
    pub state_file: PathBuf,
    /// Where `create` writes new migration sources
    pub migrations_dir: PathBuf,
    /// Live terraform state, backed up before each batch
    pub tfstate: PathBuf,
    /// Directory receiving state backups
    pub backup_dir: PathBuf,
    /// Program invoked for state commands
    pub terraform_bin: PathBuf,
    /// Passed to terraform as `-chdir=<dir>` when set
    pub working_dir: Option<PathBuf>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("migrations/.migration_state.json"),
            migrations_dir: PathBuf::from("src/migrations"),
            tfstate: PathBuf::from("terraform.tfstate"),
            backup_dir: PathBuf::from("."),
            terraform_bin: PathBuf::from("terraform"),
            working_dir: None,
        }
    }
}

/// Values given on the command line; `None` keeps the lower layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub state_file: Option<PathBuf>,
    pub migrations_dir: Option<PathBuf>,
    pub tfstate: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub terraform_bin: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
}

impl MigrateConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Resolve the file layer: an explicit path must exist, the default
    /// file is optional.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load_from_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides on top of this configuration
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(v) = overrides.state_file {
            self.state_file = v;
        }
        if let Some(v) = overrides.migrations_dir {
            self.migrations_dir = v;
        }
        if let Some(v) = overrides.tfstate {
            self.tfstate = v;
        }
        if let Some(v) = overrides.backup_dir {
            self.backup_dir = v;
        }
        if let Some(v) = overrides.terraform_bin {
            self.terraform_bin = v;
        }
        if overrides.working_dir.is_some() {
            self.working_dir = overrides.working_dir;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("state_file", &self.state_file),
            ("migrations_dir", &self.migrations_dir),
            ("tfstate", &self.tfstate),
            ("backup_dir", &self.backup_dir),
            ("terraform_bin", &self.terraform_bin),
        ] {
            if value.as_os_str().is_empty() {
                anyhow::bail!("{} must not be empty", field);
            }
        }

        if self.state_file.is_dir() {
            anyhow::bail!("state_file {:?} is a directory", self.state_file);
        }
        if self.state_file == self.tfstate {
            anyhow::bail!("state_file and tfstate must be different files");
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                anyhow::bail!("working_dir {:?} is not a directory", dir);
            }
        }

        Ok(())
    }
}
