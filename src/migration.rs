//! Migration definitions and the per-version phase machine.
//!
//! # Phase Flow
//!
//! ```text
//! Pending ──begin_apply──▶ Applying ──finish_apply──▶ Applied
//!    ▲                                                   │
//!    └──finish_rollback── RollingBack ◀──begin_rollback──┘
//! ```
//!
//! `Applying` and `RollingBack` only exist while a command list is running.
//! When a command fails, `abort()` returns to the phase the step started
//! from: the failed step is never recorded.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::command::Command;

/// Direction of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// A versioned, reversible unit of state mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    pub version: u32,
    pub name: String,
    pub description: String,
    pub up: Vec<Command>,
    pub down: Vec<Command>,
}

impl MigrationDefinition {
    /// Create a migration with empty command lists
    pub fn new(version: u32, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            description: description.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// Append a forward command
    pub fn up(mut self, command: Command) -> Self {
        self.up.push(command);
        self
    }

    /// Append a reverse command
    pub fn down(mut self, command: Command) -> Self {
        self.down.push(command);
        self
    }

    /// Commands to run for the given direction, in declared order
    pub fn commands(&self, direction: Direction) -> &[Command] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

impl fmt::Display for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{}", self.version, self.name)
    }
}

/// Durable status of a version, as shown by `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MigrationStatus {
    Applied,
    Pending,
    /// Recorded as applied, but no registered migration has this version
    Orphaned,
}

/// Phase of one migration while the engine works on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MigrationPhase {
    Pending,
    Applying,
    Applied,
    RollingBack,
}

/// Errors that can occur during phase transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransitionError {
    /// Tried to apply a version that is already applied (or in flight)
    #[error("Migration {version:04} cannot be applied while {phase}")]
    CannotApply {
        version: u32,
        phase: MigrationPhase,
    },

    /// Tried to roll back a version that is not applied
    #[error("Migration {version:04} cannot be rolled back while {phase}")]
    CannotRollBack {
        version: u32,
        phase: MigrationPhase,
    },

    /// Tried to finish or abort a step that was never started
    #[error("Migration {version:04} has no step in progress (currently {phase})")]
    NotInFlight {
        version: u32,
        phase: MigrationPhase,
    },
}

/// Phase tracker for a single version during a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTracker {
    version: u32,
    phase: MigrationPhase,
}

impl PhaseTracker {
    /// Start tracking a version from its durable status
    pub fn new(version: u32, applied: bool) -> Self {
        let phase = if applied {
            MigrationPhase::Applied
        } else {
            MigrationPhase::Pending
        };
        Self { version, phase }
    }

    #[inline]
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Pending → Applying
    pub fn begin_apply(&mut self) -> Result<(), PhaseTransitionError> {
        if self.phase != MigrationPhase::Pending {
            return Err(PhaseTransitionError::CannotApply {
                version: self.version,
                phase: self.phase,
            });
        }
        self.phase = MigrationPhase::Applying;
        Ok(())
    }

    /// Applying → Applied
    pub fn finish_apply(&mut self) -> Result<(), PhaseTransitionError> {
        self.finish(MigrationPhase::Applying, MigrationPhase::Applied)
    }

    /// Applied → RollingBack
    pub fn begin_rollback(&mut self) -> Result<(), PhaseTransitionError> {
        if self.phase != MigrationPhase::Applied {
            return Err(PhaseTransitionError::CannotRollBack {
                version: self.version,
                phase: self.phase,
            });
        }
        self.phase = MigrationPhase::RollingBack;
        Ok(())
    }

    /// RollingBack → Pending
    pub fn finish_rollback(&mut self) -> Result<(), PhaseTransitionError> {
        self.finish(MigrationPhase::RollingBack, MigrationPhase::Pending)
    }

    /// Drop an in-flight step, returning to the phase it started from
    pub fn abort(&mut self) -> Result<(), PhaseTransitionError> {
        self.phase = match self.phase {
            MigrationPhase::Applying => MigrationPhase::Pending,
            MigrationPhase::RollingBack => MigrationPhase::Applied,
            phase => {
                return Err(PhaseTransitionError::NotInFlight {
                    version: self.version,
                    phase,
                })
            }
        };
        Ok(())
    }

    fn finish(
        &mut self,
        from: MigrationPhase,
        to: MigrationPhase,
    ) -> Result<(), PhaseTransitionError> {
        if self.phase != from {
            return Err(PhaseTransitionError::NotInFlight {
                version: self.version,
                phase: self.phase,
            });
        }
        self.phase = to;
        Ok(())
    }
}
