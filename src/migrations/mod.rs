//! Composition root for migrations.
//!
//! Every migration unit is a file named `NNNN_snake_name.rs` in this
//! directory exposing a `register` function. Adding a migration means adding
//! its module below and its `register` to [`REGISTRARS`]; `tfmigrate create`
//! prints the two lines to paste.

use crate::error::Result;
use crate::registry::{Registrar, Registry};

#[path = "0001_move_account_alias_to_iam_module.rs"]
mod m0001_move_account_alias_to_iam_module;

/// Registration functions, one per migration unit
pub const REGISTRARS: &[Registrar] = &[
    m0001_move_account_alias_to_iam_module::register,
];

/// Build the registry of every known migration.
///
/// Fails on a duplicate version, before anything can run.
pub fn registry() -> Result<Registry> {
    Registry::from_registrars(REGISTRARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery;
    use crate::migration::Direction;
    use std::path::Path;

    #[test]
    fn test_registry_builds() {
        let registry = registry().expect("registered migrations must not collide");
        assert_eq!(registry.len(), REGISTRARS.len());
        registry.all().expect("every factory reports its own version");
    }

    #[test]
    fn test_every_migration_is_reversible_in_shape() {
        let registry = registry().unwrap();
        for version in registry.versions() {
            let m = registry.get(version).unwrap();
            assert!(!m.commands(Direction::Up).is_empty(), "{m} has no up commands");
            assert!(!m.commands(Direction::Down).is_empty(), "{m} has no down commands");
            for command in m.up.iter().chain(&m.down) {
                command.validate().unwrap_or_else(|e| panic!("{m}: {e}"));
            }
        }
    }

    #[test]
    fn test_files_on_disk_match_registry() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/migrations");
        let registry = registry().unwrap();
        let on_disk = discovery::scan_dir(&dir).unwrap();

        let disk_versions: Vec<u32> = on_disk.iter().map(|m| m.version).collect();
        assert_eq!(disk_versions, registry.versions(), "every file must be registered");
        for found in on_disk {
            assert_eq!(registry.get(found.version).unwrap().name, found.name);
        }
    }
}
