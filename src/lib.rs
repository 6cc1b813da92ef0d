//! tfmigrate library
//!
//! Versioned, reversible migrations of Terraform state: a registry of
//! migrations, a tracking file recording what has been applied, and an
//! engine that applies or rolls back batches in strict version order.

pub mod backup;
pub mod cli;
pub mod command;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod migration;
pub mod migrations;
pub mod process_guard;
pub mod registry;
pub mod report;
pub mod scaffold;
pub mod state;

// Re-export main types for convenience
pub use backup::{BackupGuard, BackupOutcome};
pub use command::{Command, CommandError, CommandKind, RawCommand, StateOp, TerraformArgs};
pub use config::MigrateConfig;
pub use engine::{BatchReport, Engine, EngineEvent, Plan, StatusEntry};
pub use error::{MigrateError, Result};
pub use executor::{ExecutionError, Executor, TerraformExecutor};
pub use migration::{Direction, MigrationDefinition, MigrationPhase, MigrationStatus, PhaseTracker};
pub use registry::{MigrationSummary, Registrar, Registry};
pub use state::{AppliedRecord, StateStore, TrackingState};
