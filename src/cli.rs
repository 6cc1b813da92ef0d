use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// tfmigrate - sequential, reversible Terraform state migrations
#[derive(Parser, Debug)]
#[command(name = "tfmigrate")]
#[command(about = "Apply and roll back Terraform state migrations (mv, rm, import) in order")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ./tfmigrate.json if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tracking state file
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Directory holding migration source files
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Live terraform state file to back up before a batch
    #[arg(long, global = true)]
    pub tfstate: Option<PathBuf>,

    /// Directory receiving state backups
    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    /// Terraform program to invoke
    #[arg(long, global = true)]
    pub terraform: Option<PathBuf>,

    /// Run terraform in this directory (passed as -chdir)
    #[arg(long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Print what `up`/`down` would run without running it.
    ///
    /// No backup is taken and the tracking state is left untouched.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Create a new migration file with the next version number
    Create {
        /// Migration name (sanitized to lowercase snake case)
        name: String,
    },
    /// Apply pending migrations (all, or the next N)
    Up {
        /// Number of migrations to apply; 0 or omitted means all
        steps: Option<usize>,
    },
    /// Roll back applied migrations, most recent first
    Down {
        /// Number of migrations to roll back
        #[arg(default_value_t = 1)]
        steps: usize,
    },
    /// Show every migration with its applied/pending status
    Status,
    /// Show the current (latest applied) version
    Version,
    /// Clear the tracking state (DESTRUCTIVE; does not touch terraform state)
    Reset,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            state_file: self.state_file.clone(),
            migrations_dir: self.migrations_dir.clone(),
            tfstate: self.tfstate.clone(),
            backup_dir: self.backup_dir.clone(),
            terraform_bin: self.terraform.clone(),
            working_dir: self.chdir.clone(),
        }
    }
}

/// Ask for a typed `yes`. Anything else, including EOF, is a refusal.
pub fn confirm<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> io::Result<bool> {
    write!(output, "{}", prompt)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
