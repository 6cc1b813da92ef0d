//! Directory scan for migration source files.
//!
//! Migration units follow the naming convention
//! `<4-digit zero-padded version>_<lowercase snake name>.rs`. Scanning is
//! advisory: the registry is the source of truth, and nothing found here is
//! ever executed. It feeds version numbering for `create` and the
//! "on disk but not registered" warning in `status`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// A migration source file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredMigration {
    pub version: u32,
    pub name: String,
    pub path: PathBuf,
}

/// Parse `0001_move_alias.rs` into `(1, "move_alias")`.
///
/// The version is the numeric prefix up to the first underscore. Returns
/// None for anything that does not follow the convention.
pub fn parse_artifact_name(file_name: &str) -> Option<(u32, String)> {
    let stem = file_name.strip_suffix(".rs")?;
    let (prefix, name) = stem.split_once('_')?;

    if prefix.len() < 4 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version: u32 = prefix.parse().ok()?;
    if version == 0 || !is_snake_case(name) {
        return None;
    }
    Some((version, name.to_string()))
}

fn is_snake_case(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('_')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// List migration files in `dir`, sorted by version.
///
/// A missing directory yields an empty list.
pub fn scan_dir(dir: &Path) -> io::Result<Vec<DiscoveredMigration>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        match parse_artifact_name(file_name) {
            Some((version, name)) => found.push(DiscoveredMigration {
                version,
                name,
                path: entry.path(),
            }),
            None => debug!("Ignoring {:?}: not a migration file name", entry.path()),
        }
    }

    found.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_valid_names() {
        assert_eq!(
            parse_artifact_name("0001_move_account_alias_to_iam_module.rs"),
            Some((1, "move_account_alias_to_iam_module".to_string()))
        );
        assert_eq!(
            parse_artifact_name("0042_v2_cleanup.rs"),
            Some((42, "v2_cleanup".to_string()))
        );
        assert_eq!(
            parse_artifact_name("12345_big.rs"),
            Some((12345, "big".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_other_files() {
        for name in [
            "mod.rs",
            "0001.rs",
            "001_short_prefix.rs",
            "0000_zero.rs",
            "0003_CamelCase.rs",
            "0003_has-dash.rs",
            "0003_.rs",
            "0003_name.go",
            "abcd_name.rs",
            "20240101120000x_name.rs",
        ] {
            assert_eq!(parse_artifact_name(name), None, "{name} should be ignored");
        }
    }

    #[test]
    fn test_scan_sorts_and_filters() {
        let dir = TempDir::new().unwrap();
        for name in ["0010_ten.rs", "0002_two.rs", "mod.rs", "README.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let found = scan_dir(dir.path()).unwrap();
        let versions: Vec<u32> = found.iter().map(|m| m.version).collect();
        assert_eq!(versions, [2, 10]);
        assert_eq!(found[1].name, "ten");
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan_dir(&dir.path().join("nope")).unwrap().is_empty());
    }
}
