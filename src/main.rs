//! tfmigrate - Main entry point
//!
//! Composition root: parses the command line, resolves configuration,
//! builds the migration registry and dispatches to the engine.

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use tracing::{debug, error, info, warn};

use tfmigrate::backup::{BackupGuard, BackupOutcome};
use tfmigrate::cli::{self, Cli, Commands};
use tfmigrate::config::MigrateConfig;
use tfmigrate::engine::{Engine, EngineEvent};
use tfmigrate::executor::TerraformExecutor;
use tfmigrate::migration::{Direction, MigrationStatus};
use tfmigrate::registry::Registry;
use tfmigrate::state::StateStore;
use tfmigrate::{discovery, logging, migrations, process_guard, report, scaffold, MigrateError};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and --version are not failures; everything else is exit 1
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    logging::init(cli.verbose);
    info!("tfmigrate {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = MigrateConfig::discover(cli.config.as_deref())?.with_overrides(cli.overrides());
    config.validate().context("Invalid configuration")?;
    debug!("Configuration: {:?}", config);

    // A duplicate version stops everything here, before any command runs
    let registry = migrations::registry()?;
    debug!("{:?}", registry);

    match cli.command {
        Commands::Create { name } => create(&registry, &config, &name),
        Commands::Up { steps } => up(&registry, &config, steps, cli.dry_run),
        Commands::Down { steps } => down(&registry, &config, steps, cli.dry_run),
        Commands::Status => status(&registry, &config),
        Commands::Version => version(&registry, &config),
        Commands::Reset => reset(&registry, &config),
    }
}

fn engine<'r>(registry: &'r Registry, config: &MigrateConfig) -> Engine<'r, TerraformExecutor> {
    let mut executor = TerraformExecutor::new(&config.terraform_bin);
    if let Some(dir) = &config.working_dir {
        executor = executor.with_working_dir(dir);
    }
    Engine::new(registry, StateStore::new(&config.state_file), executor)
        .with_backup(BackupGuard::new(&config.tfstate, &config.backup_dir))
}

fn create(registry: &Registry, config: &MigrateConfig, name: &str) -> Result<()> {
    let created = scaffold::create_migration(registry, &config.migrations_dir, name)?;
    println!(
        "{}",
        format!("✓ Created migration: {}", created.path.display()).green()
    );
    let [module, registrar] = created.wiring();
    println!("\nNext steps:");
    println!("1. Add your state operations to {}", created.path.display());
    println!("2. Wire it into migrations/mod.rs:\n\n{}\n", module);
    println!("   and add to REGISTRARS:\n\n    {}\n", registrar);
    println!("3. Rebuild, then run 'tfmigrate up'");
    Ok(())
}

fn up(
    registry: &Registry,
    config: &MigrateConfig,
    steps: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let mut engine = engine(registry, config);
    if dry_run {
        print!("{}", report::plan(&engine.plan_up(steps)?));
        println!();
        return Ok(());
    }

    println!("{}\n", "Running migrations UP".cyan());
    let batch = engine.up(steps, print_event)?;
    if batch.completed.is_empty() {
        println!("{}", "✓ No pending migrations".green());
    } else {
        println!("{}", "✓ All migrations applied".green());
    }
    Ok(())
}

fn down(registry: &Registry, config: &MigrateConfig, steps: usize, dry_run: bool) -> Result<()> {
    let mut engine = engine(registry, config);
    if dry_run {
        print!("{}", report::plan(&engine.plan_down(steps)?));
        println!();
        return Ok(());
    }

    println!("{}\n", "Rolling back migrations".cyan());
    let batch = engine.down(steps, print_event)?;
    if batch.completed.is_empty() {
        println!("{}", "No migrations to roll back".yellow());
    } else {
        println!("{}", "✓ Rollback completed".green());
    }
    Ok(())
}

fn print_event(event: &EngineEvent<'_>) {
    match event {
        EngineEvent::Backup(BackupOutcome::Created(path)) => {
            println!("{}\n", format!("✓ State backed up to: {}", path.display()).green());
        }
        EngineEvent::Backup(BackupOutcome::Failed(reason)) => {
            eprintln!(
                "{}\n",
                format!("! State backup failed: {} (continuing without a backup)", reason).yellow()
            );
        }
        EngineEvent::Backup(BackupOutcome::NoLiveState) => {}
        EngineEvent::OutOfOrder { version, current } => {
            println!(
                "{}",
                format!(
                    "! Migration {:04} is older than current version {:04}; applying out of order",
                    version, current
                )
                .yellow()
            );
        }
        EngineEvent::MigrationStarted {
            version,
            name,
            direction,
        } => {
            let verb = match direction {
                Direction::Up => "Applying",
                Direction::Down => "Rolling back",
            };
            println!("{}", format!("→ {} migration {:04}: {}", verb, version, name).yellow());
        }
        EngineEvent::CommandStarted {
            index,
            total,
            command,
            ..
        } => {
            println!("  [{}/{}] {} ({})", index, total, command.description, command);
        }
        EngineEvent::MigrationFinished { version, direction } => {
            let done = match direction {
                Direction::Up => "applied successfully",
                Direction::Down => "rolled back",
            };
            println!("{}\n", format!("✓ Migration {:04} {}", version, done).green());
        }
    }
}

fn status(registry: &Registry, config: &MigrateConfig) -> Result<()> {
    let engine = engine(registry, config);
    let entries = engine.status()?;

    println!("{}\n", "Migration Status".cyan());
    println!("{}", report::status_header());
    println!("{}", "-".repeat(80));
    for entry in &entries {
        let row = report::status_row(entry);
        match entry.status {
            MigrationStatus::Applied => println!("{}", row.green()),
            MigrationStatus::Pending => println!("{}", row.yellow()),
            MigrationStatus::Orphaned => println!("{}", row.red()),
        }
    }

    let totals = report::totals(&entries);
    println!();
    println!("Total migrations: {}", totals.registered);
    println!("Applied: {}", totals.applied);
    println!("Pending: {}", totals.pending);
    if totals.orphaned > 0 {
        println!(
            "{}",
            format!(
                "Orphaned: {} (recorded as applied but not registered; up/down will refuse to run)",
                totals.orphaned
            )
            .red()
        );
    }

    match discovery::scan_dir(&config.migrations_dir) {
        Ok(on_disk) => {
            for file in report::unregistered_files(&entries, &on_disk) {
                println!(
                    "{}",
                    format!(
                        "! {} is not registered in migrations/mod.rs and will not run",
                        file.path.display()
                    )
                    .yellow()
                );
            }
        }
        Err(e) => warn!("Could not scan {:?}: {}", config.migrations_dir, e),
    }
    Ok(())
}

fn version(registry: &Registry, config: &MigrateConfig) -> Result<()> {
    let engine = engine(registry, config);
    println!("{}", report::current_version(engine.current()?.as_ref()));
    Ok(())
}

fn reset(registry: &Registry, config: &MigrateConfig) -> Result<()> {
    println!("{}", "WARNING: This will reset all migration tracking!".red());
    println!("This does NOT undo migrations, only resets the tracking state.\n");

    let prompt = "Type 'yes' to confirm: ";
    let confirmed = cli::confirm(prompt, &mut io::stdin().lock(), &mut io::stdout())
        .context("Failed to read confirmation")?;
    if !confirmed {
        println!("{}", "Reset cancelled".yellow());
        return Ok(());
    }

    let dropped = engine(registry, config).reset()?;
    println!(
        "{}",
        format!("✓ Migration state reset ({} record(s) cleared)", dropped).green()
    );
    Ok(())
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<MigrateError>() {
        Some(e) => {
            error!("{}", e);
            eprintln!("{}", format!("✗ {}", e).red());
            if e.needs_manual_intervention() {
                let completed = e.completed_versions();
                if !completed.is_empty() {
                    let list: Vec<String> = completed.iter().map(|v| format!("{:04}", v)).collect();
                    eprintln!("  Completed before the failure (recorded): {}", list.join(", "));
                }
                eprintln!("\nYou may need to manually fix the state before re-running.");
            }
        }
        None => {
            error!("{:#}", err);
            eprintln!("{}", format!("✗ {:#}", err).red());
        }
    }
}
