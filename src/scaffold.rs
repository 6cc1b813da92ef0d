//! `create <name>`: write a new migration source file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::discovery;
use crate::registry::Registry;

/// Lowercase, spaces and dashes to underscores, drop everything outside
/// `[a-z0-9_]`, collapse runs of underscores
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    kept.split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// One past the highest version known to the registry or present on disk
pub fn next_version(registry: &Registry, migrations_dir: &Path) -> Result<u32> {
    let on_disk = discovery::scan_dir(migrations_dir)
        .with_context(|| format!("Failed to scan {:?}", migrations_dir))?
        .last()
        .map(|m| m.version);
    let highest = registry.latest().max(on_disk).unwrap_or(0);
    highest
        .checked_add(1)
        .context("Migration version space exhausted")
}

/// A freshly written migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffolded {
    pub version: u32,
    pub name: String,
    pub path: PathBuf,
}

impl Scaffolded {
    /// Module name used in the composition root
    pub fn module_name(&self) -> String {
        format!("m{:04}_{}", self.version, self.name)
    }

    /// Lines to add to `migrations/mod.rs`
    pub fn wiring(&self) -> [String; 2] {
        let file = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        [
            format!("#[path = \"{}\"]\nmod {};", file, self.module_name()),
            format!("{}::register,", self.module_name()),
        ]
    }
}

/// Create `<dir>/<NNNN>_<name>.rs`. Never overwrites an existing file.
pub fn create_migration(
    registry: &Registry,
    migrations_dir: &Path,
    raw_name: &str,
) -> Result<Scaffolded> {
    let name = sanitize_name(raw_name);
    if name.is_empty() {
        anyhow::bail!("Migration name {:?} has no usable characters (use a-z, 0-9, _)", raw_name);
    }

    let version = next_version(registry, migrations_dir)?;
    let path = migrations_dir.join(format!("{:04}_{}.rs", version, name));

    std::fs::create_dir_all(migrations_dir)
        .with_context(|| format!("Failed to create {:?}", migrations_dir))?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("Failed to create migration file {:?}", path))?;
    file.write_all(render_template(version, &name).as_bytes())
        .with_context(|| format!("Failed to write migration file {:?}", path))?;

    tracing::info!("Created migration {:04} at {:?}", version, path);
    Ok(Scaffolded { version, name, path })
}

/// Source text of a new, empty migration
pub fn render_template(version: u32, name: &str) -> String {
    format!(
        r#"//! {version:04} - {name}

#[allow(unused_imports)]
use crate::command::Command;
use crate::error::Result;
use crate::migration::MigrationDefinition;
use crate::registry::Registry;

pub fn migration() -> MigrationDefinition {{
    MigrationDefinition::new(
        {version},
        "{name}",
        "Description of what this migration does",
    )
    // Move a resource to a new address:
    // .up(Command::move_resource(
    //     "Move account alias to IAM module",
    //     "aws_iam_account_alias.alias",
    //     "module.iam.aws_iam_account_alias.alias[0]",
    // ))
    //
    // Remove a resource from state:
    // .up(Command::remove("Remove old user", "aws_iam_user.old_user"))
    //
    // Import an existing resource:
    // .up(Command::import("Import bucket", "aws_s3_bucket.example", "my-bucket-name"))
    //
    // Reverse every up command, in reverse order:
    // .down(Command::move_resource(
    //     "Move account alias back to root module",
    //     "module.iam.aws_iam_account_alias.alias[0]",
    //     "aws_iam_account_alias.alias",
    // ))
}}

pub fn register(registry: &mut Registry) -> Result<()> {{
    registry.register({version}, migration)
}}
"#
    )
}
