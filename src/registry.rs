//! Migration registry.
//!
//! Maps a version to a factory producing its [`MigrationDefinition`].
//! Factories are only invoked when a definition is actually needed, so the
//! command lists of migrations outside the current batch are never built.
//!
//! The registry is built once at startup from an explicit list of
//! registration functions (see `crate::migrations`). A duplicate version
//! fails the whole build before any migration can run.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migration::MigrationDefinition;

/// Deferred constructor for one migration
pub type MigrationFactory = Box<dyn Fn() -> MigrationDefinition + Send + Sync>;

/// A registration function owned by the composition root
pub type Registrar = fn(&mut Registry) -> Result<()>;

/// Version and name of a registered migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub version: u32,
    pub name: String,
}

/// Catalog of every known migration, keyed by version
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<u32, MigrationFactory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("versions", &self.versions())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry by running each registration function in order.
    pub fn from_registrars(registrars: &[Registrar]) -> Result<Self> {
        let mut registry = Self::new();
        for register in registrars {
            register(&mut registry)?;
        }
        debug!("Registry built with {} migration(s)", registry.len());
        Ok(registry)
    }

    /// Register a factory under `version`.
    ///
    /// # Errors
    ///
    /// - `InvalidVersion` for version 0
    /// - `DuplicateVersion` if the version is already taken
    pub fn register<F>(&mut self, version: u32, factory: F) -> Result<()>
    where
        F: Fn() -> MigrationDefinition + Send + Sync + 'static,
    {
        if version == 0 {
            return Err(MigrateError::InvalidVersion);
        }
        if self.factories.contains_key(&version) {
            return Err(MigrateError::DuplicateVersion { version });
        }
        self.factories.insert(version, Box::new(factory));
        Ok(())
    }

    /// Registered versions in ascending order, without invoking factories
    pub fn versions(&self) -> Vec<u32> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, version: u32) -> bool {
        self.factories.contains_key(&version)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Highest registered version, if any
    pub fn latest(&self) -> Option<u32> {
        self.factories.keys().next_back().copied()
    }

    /// Every migration's version and name, ascending.
    ///
    /// Invokes every factory once.
    pub fn all(&self) -> Result<Vec<MigrationSummary>> {
        self.factories
            .keys()
            .map(|&version| {
                let definition = self.get(version)?;
                Ok(MigrationSummary {
                    version,
                    name: definition.name,
                })
            })
            .collect()
    }

    /// Build the full definition for one version.
    ///
    /// # Errors
    ///
    /// - `NotFound` if nothing is registered under `version`
    /// - `VersionMismatch` if the factory reports another version
    pub fn get(&self, version: u32) -> Result<MigrationDefinition> {
        let factory = self
            .factories
            .get(&version)
            .ok_or(MigrateError::NotFound { version })?;
        let definition = factory();
        if definition.version != version {
            return Err(MigrateError::VersionMismatch {
                registered: version,
                reported: definition.version,
            });
        }
        Ok(definition)
    }
}
