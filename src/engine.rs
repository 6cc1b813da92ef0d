//! Migration engine.
//!
//! Reconciles the registry against the tracking state and drives batches:
//!
//! - `up(n)`: pending versions in ascending order, first `n` (all if `n` is
//!   absent or 0)
//! - `down(n)`: the last `n` applied records, most recent first
//!
//! Commands of one migration run strictly in declared order. The tracking
//! state is persisted after every migration, so a failure part-way through
//! a batch keeps the record of everything that finished before it. Nothing
//! is retried or compensated automatically.

use chrono::{Local, Utc};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupGuard, BackupOutcome};
use crate::command::Command;
use crate::error::{MigrateError, Result};
use crate::executor::Executor;
use crate::migration::{Direction, MigrationDefinition, MigrationStatus, PhaseTracker};
use crate::registry::Registry;
use crate::state::{AppliedRecord, StateStore, TrackingState};

/// Progress notifications emitted while a batch runs
#[derive(Debug)]
pub enum EngineEvent<'a> {
    /// The backup guard ran before the first command
    Backup(&'a BackupOutcome),
    /// A pending version is lower than the current version
    OutOfOrder { version: u32, current: u32 },
    MigrationStarted {
        version: u32,
        name: &'a str,
        direction: Direction,
    },
    CommandStarted {
        version: u32,
        /// 1-based position within the migration
        index: usize,
        total: usize,
        command: &'a Command,
    },
    MigrationFinished { version: u32, direction: Direction },
}

/// Ordered migrations selected for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub direction: Direction,
    pub steps: Vec<MigrationDefinition>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn versions(&self) -> Vec<u32> {
        self.steps.iter().map(|m| m.version).collect()
    }
}

/// Outcome of a batch that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub direction: Direction,
    /// Versions applied (up) or rolled back (down), in execution order
    pub completed: Vec<u32>,
    /// None when the batch was empty and no backup was attempted
    pub backup: Option<BackupOutcome>,
}

/// One line of `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub version: u32,
    pub name: String,
    pub status: MigrationStatus,
    pub applied_at: Option<chrono::DateTime<Utc>>,
}

pub struct Engine<'r, E> {
    registry: &'r Registry,
    store: StateStore,
    executor: E,
    backup: Option<BackupGuard>,
}

impl<'r, E: Executor> Engine<'r, E> {
    pub fn new(registry: &'r Registry, store: StateStore, executor: E) -> Self {
        Self {
            registry,
            store,
            executor,
            backup: None,
        }
    }

    /// Snapshot the live state before each non-empty batch
    pub fn with_backup(mut self, guard: BackupGuard) -> Self {
        self.backup = Some(guard);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Load the tracking state and refuse to work with records the
    /// registry cannot explain.
    fn load_checked(&self) -> Result<TrackingState> {
        let state = self.store.load()?;
        if let Some(orphan) = state
            .applied
            .iter()
            .find(|r| !self.registry.contains(r.version))
        {
            return Err(MigrateError::UnknownAppliedVersion {
                version: orphan.version,
                name: orphan.name.clone(),
            });
        }
        Ok(state)
    }

    /// Registered versions not yet applied, ascending
    fn pending_in(&self, state: &TrackingState) -> Vec<u32> {
        self.registry
            .versions()
            .into_iter()
            .filter(|v| !state.contains(*v))
            .collect()
    }

    /// The batch `up(steps)` would run, without running it
    pub fn plan_up(&self, steps: Option<usize>) -> Result<Plan> {
        let state = self.load_checked()?;
        self.plan_up_in(&state, steps)
    }

    fn plan_up_in(&self, state: &TrackingState, steps: Option<usize>) -> Result<Plan> {
        let mut pending = self.pending_in(state);
        if let Some(n) = steps {
            if n > 0 && n < pending.len() {
                pending.truncate(n);
            }
        }

        let steps = pending
            .into_iter()
            .map(|v| self.registry.get(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(Plan {
            direction: Direction::Up,
            steps,
        })
    }

    /// The batch `down(steps)` would run, without running it
    pub fn plan_down(&self, steps: usize) -> Result<Plan> {
        let state = self.load_checked()?;
        self.plan_down_in(&state, steps)
    }

    fn plan_down_in(&self, state: &TrackingState, steps: usize) -> Result<Plan> {
        let count = steps.min(state.len());
        let steps = state.applied[state.len() - count..]
            .iter()
            .rev()
            .map(|r| self.registry.get(r.version))
            .collect::<Result<Vec<_>>>()?;
        Ok(Plan {
            direction: Direction::Down,
            steps,
        })
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// - `Persistence` / `UnknownAppliedVersion` before anything runs
    /// - `StepFailed` when a command fails; earlier migrations of the batch
    ///   stay applied and recorded
    /// - `RecordNotSaved` when a migration ran but the tracking state could
    ///   not be written; the batch stops there
    pub fn up<F>(&mut self, steps: Option<usize>, mut on_event: F) -> Result<BatchReport>
    where
        F: FnMut(&EngineEvent<'_>),
    {
        let mut state = self.load_checked()?;
        let plan = self.plan_up_in(&state, steps)?;
        if plan.is_empty() {
            info!("No pending migrations");
            return Ok(BatchReport {
                direction: Direction::Up,
                completed: Vec::new(),
                backup: None,
            });
        }

        if let Some(current) = state.current().map(|r| r.version) {
            for version in plan.versions().into_iter().filter(|&v| v < current) {
                warn!(
                    "Migration {:04} is older than current version {:04}; applying out of order",
                    version, current
                );
                on_event(&EngineEvent::OutOfOrder { version, current });
            }
        }

        let backup = self.run_backup(&mut on_event);
        let mut completed = Vec::with_capacity(plan.steps.len());

        for definition in &plan.steps {
            let mut tracker =
                PhaseTracker::new(definition.version, state.contains(definition.version));
            tracker.begin_apply()?;
            self.run_commands(
                definition,
                Direction::Up,
                &mut tracker,
                &completed,
                &mut on_event,
            )?;

            state
                .record(AppliedRecord::new(definition, Utc::now()))
                .and_then(|()| self.store.save(&state))
                .map_err(|e| unrecorded(definition, Direction::Up, &completed, e))?;
            tracker.finish_apply()?;

            info!("Migration {:04} applied", definition.version);
            completed.push(definition.version);
            on_event(&EngineEvent::MigrationFinished {
                version: definition.version,
                direction: Direction::Up,
            });
        }

        Ok(BatchReport {
            direction: Direction::Up,
            completed,
            backup: Some(backup),
        })
    }

    /// Roll back the most recently applied migrations.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::up`]; records removed before the failure stay removed.
    pub fn down<F>(&mut self, steps: usize, mut on_event: F) -> Result<BatchReport>
    where
        F: FnMut(&EngineEvent<'_>),
    {
        let mut state = self.load_checked()?;
        let plan = self.plan_down_in(&state, steps)?;
        if plan.is_empty() {
            info!("No migrations to roll back");
            return Ok(BatchReport {
                direction: Direction::Down,
                completed: Vec::new(),
                backup: None,
            });
        }

        let backup = self.run_backup(&mut on_event);
        let mut completed = Vec::with_capacity(plan.steps.len());

        for definition in &plan.steps {
            if let Some(record) = state.current() {
                if record.name != definition.name {
                    warn!(
                        "Migration {:04} was applied as '{}' but is now named '{}'",
                        record.version, record.name, definition.name
                    );
                }
            }

            let mut tracker =
                PhaseTracker::new(definition.version, state.contains(definition.version));
            tracker.begin_rollback()?;
            self.run_commands(
                definition,
                Direction::Down,
                &mut tracker,
                &completed,
                &mut on_event,
            )?;

            state.pop_last();
            self.store
                .save(&state)
                .map_err(|e| unrecorded(definition, Direction::Down, &completed, e))?;
            tracker.finish_rollback()?;

            info!("Migration {:04} rolled back", definition.version);
            completed.push(definition.version);
            on_event(&EngineEvent::MigrationFinished {
                version: definition.version,
                direction: Direction::Down,
            });
        }

        Ok(BatchReport {
            direction: Direction::Down,
            completed,
            backup: Some(backup),
        })
    }

    fn run_backup<F>(&self, on_event: &mut F) -> BackupOutcome
    where
        F: FnMut(&EngineEvent<'_>),
    {
        let outcome = match &self.backup {
            Some(guard) => guard.snapshot(Local::now().naive_local()),
            None => BackupOutcome::NoLiveState,
        };
        on_event(&EngineEvent::Backup(&outcome));
        outcome
    }

    fn run_commands<F>(
        &mut self,
        definition: &MigrationDefinition,
        direction: Direction,
        tracker: &mut PhaseTracker,
        completed: &[u32],
        on_event: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&EngineEvent<'_>),
    {
        on_event(&EngineEvent::MigrationStarted {
            version: definition.version,
            name: &definition.name,
            direction,
        });

        let commands = definition.commands(direction);
        for (i, command) in commands.iter().enumerate() {
            on_event(&EngineEvent::CommandStarted {
                version: definition.version,
                index: i + 1,
                total: commands.len(),
                command,
            });
            debug!("[{:04} {}/{}] {}", definition.version, i + 1, commands.len(), command);

            if let Err(e) = self.executor.execute(command) {
                tracker.abort()?;
                error!(
                    "Migration {:04} ({}) failed during {} at command {}: {}",
                    definition.version,
                    definition.name,
                    direction,
                    i + 1,
                    e
                );
                return Err(MigrateError::StepFailed {
                    version: definition.version,
                    name: definition.name.clone(),
                    direction,
                    command: i + 1,
                    completed: completed.to_vec(),
                    source: Box::new(e.into()),
                });
            }
        }
        Ok(())
    }

    /// Every registered version with its status, plus orphaned records
    pub fn status(&self) -> Result<Vec<StatusEntry>> {
        let state = self.store.load()?;
        let mut entries: Vec<StatusEntry> = self
            .registry
            .all()?
            .into_iter()
            .map(|summary| {
                let record = state.find(summary.version);
                StatusEntry {
                    version: summary.version,
                    name: summary.name,
                    status: if record.is_some() {
                        MigrationStatus::Applied
                    } else {
                        MigrationStatus::Pending
                    },
                    applied_at: record.map(|r| r.applied_at),
                }
            })
            .collect();

        entries.extend(
            state
                .applied
                .iter()
                .filter(|r| !self.registry.contains(r.version))
                .map(|r| StatusEntry {
                    version: r.version,
                    name: r.name.clone(),
                    status: MigrationStatus::Orphaned,
                    applied_at: Some(r.applied_at),
                }),
        );
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    /// Most recently applied record, if any
    pub fn current(&self) -> Result<Option<AppliedRecord>> {
        Ok(self.store.load()?.current().cloned())
    }

    /// Forget every applied record. No terraform command is run.
    ///
    /// An unreadable tracking file is overwritten too; this is the
    /// operator's way out of a corrupt file. Returns the number of records
    /// dropped.
    pub fn reset(&mut self) -> Result<usize> {
        let dropped = match self.store.load() {
            Ok(state) => state.len(),
            Err(e) => {
                warn!("Discarding unreadable tracking state: {}", e);
                0
            }
        };
        self.store.save(&TrackingState::default())?;
        info!("Tracking state reset ({} record(s) dropped)", dropped);
        Ok(dropped)
    }
}

/// The commands of `definition` ran but its record did not reach disk
fn unrecorded(
    definition: &MigrationDefinition,
    direction: Direction,
    completed: &[u32],
    source: MigrateError,
) -> MigrateError {
    error!(
        "Migration {:04} ({}) ran during {} but the tracking state could not be saved: {}",
        definition.version, definition.name, direction, source
    );
    MigrateError::RecordNotSaved {
        version: definition.version,
        name: definition.name.clone(),
        direction,
        completed: completed.to_vec(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionError;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        ran: Vec<String>,
        fail_on: Option<String>,
    }

    impl Executor for Recorder {
        fn execute(&mut self, command: &Command) -> std::result::Result<(), ExecutionError> {
            if self.fail_on.as_deref() == Some(command.description.as_str()) {
                return Err(ExecutionError::Failed {
                    invocation: command.to_string(),
                    code: Some(1),
                });
            }
            self.ran.push(command.description.clone());
            Ok(())
        }
    }

    fn registry(versions: &[u32]) -> Registry {
        let mut registry = Registry::new();
        for &v in versions {
            registry
                .register(v, move || {
                    MigrationDefinition::new(v, format!("m{}", v), "")
                        .up(Command::move_resource(
                            format!("up{}", v),
                            format!("a.r{}", v),
                            format!("module.m.a.r{}", v),
                        ))
                        .down(Command::move_resource(
                            format!("down{}", v),
                            format!("module.m.a.r{}", v),
                            format!("a.r{}", v),
                        ))
                })
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_up_then_down_single_step() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&[1, 2]);
        let mut rec = Recorder::default();
        let store = StateStore::new(dir.path().join("s.json"));
        let mut engine = Engine::new(&registry, store, &mut rec);

        let report = engine.up(None, |_| {}).unwrap();
        assert_eq!(report.completed, [1, 2]);
        let report = engine.down(1, |_| {}).unwrap();
        assert_eq!(report.completed, [2]);
        assert_eq!(engine.current().unwrap().map(|r| r.version), Some(1));

        drop(engine);
        assert_eq!(rec.ran, ["up1", "up2", "down2"]);
    }

    #[test]
    fn test_empty_batch_skips_backup() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&[]);
        let store = StateStore::new(dir.path().join("s.json"));
        let mut engine = Engine::new(&registry, store, Recorder::default());
        let mut events = 0;
        let report = engine.up(None, |_| events += 1).unwrap();
        assert!(report.completed.is_empty());
        assert!(report.backup.is_none());
        assert_eq!(events, 0);
    }

    #[test]
    fn test_failure_aborts_and_keeps_earlier_records() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&[1, 2, 3]);
        let rec = Recorder {
            fail_on: Some("up2".into()),
            ..Default::default()
        };
        let mut engine = Engine::new(&registry, StateStore::new(dir.path().join("s.json")), rec);

        let err = engine.up(None, |_| {}).unwrap_err();
        assert!(matches!(err, MigrateError::StepFailed { version: 2, command: 1, .. }));
        assert_eq!(err.completed_versions(), &[1]);
        assert_eq!(engine.store().load().unwrap().versions(), [1]);
        assert_eq!(engine.into_executor().ran, ["up1"]);
    }

    #[test]
    fn test_orphaned_record_blocks_batches_but_shows_in_status() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("s.json"));
        let mut state = TrackingState::default();
        state
            .record(AppliedRecord::new(&MigrationDefinition::new(9, "gone", ""), Utc::now()))
            .unwrap();
        store.save(&state).unwrap();

        let registry = registry(&[1]);
        let mut engine = Engine::new(&registry, store, Recorder::default());
        assert!(matches!(
            engine.up(None, |_| {}),
            Err(MigrateError::UnknownAppliedVersion { version: 9, .. })
        ));
        assert!(engine.down(1, |_| {}).is_err());

        let status = engine.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].status, MigrationStatus::Pending);
        assert_eq!(status[1].status, MigrationStatus::Orphaned);
        assert!(engine.into_executor().ran.is_empty());
    }

    #[test]
    fn test_reset_overwrites_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "not json").unwrap();

        let registry = registry(&[1]);
        let mut engine = Engine::new(&registry, StateStore::new(&path), Recorder::default());
        assert!(engine.status().is_err());
        assert_eq!(engine.reset().unwrap(), 0);
        assert!(engine.store().load().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_version_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("s.json"));
        let registry_a = registry(&[1, 3]);
        Engine::new(&registry_a, store.clone(), Recorder::default())
            .up(None, |_| {})
            .unwrap();

        let registry_b = registry(&[1, 2, 3]);
        let mut engine = Engine::new(&registry_b, store, Recorder::default());
        let mut out_of_order = Vec::new();
        let report = engine
            .up(None, |e| {
                if let EngineEvent::OutOfOrder { version, current } = e {
                    out_of_order.push((*version, *current));
                }
            })
            .unwrap();
        assert_eq!(report.completed, [2]);
        assert_eq!(out_of_order, [(2, 3)]);
        assert_eq!(engine.store().load().unwrap().versions(), [1, 3, 2]);
    }
}
