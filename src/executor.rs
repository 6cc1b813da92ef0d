//! Command execution.
//!
//! [`TerraformExecutor`] is the only place that starts the external tool.
//! Each [`Command`] becomes exactly one blocking invocation:
//!
//! - arguments go straight to `execve`, never through a shell
//! - stdout/stderr are inherited so the operator sees terraform's output
//! - the child PID is registered with [`ChildRegistry`] while it runs

use std::path::PathBuf;
use std::process::{Command as Process, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandError, TerraformArgs};
use crate::process_guard::{ChildRegistry, CommandDeathPact};

/// Failure of a single command invocation
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Command failed validation; nothing was started
    #[error("{command}: {source}")]
    Invalid {
        command: String,
        #[source]
        source: CommandError,
    },

    /// The process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and reported failure
    #[error("`{invocation}` {}", describe_status(*code))]
    Failed {
        invocation: String,
        /// Exit code, None if killed by a signal
        code: Option<i32>,
    },
}

fn describe_status(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Runs state commands.
///
/// Implementations must run one command to completion before returning and
/// must not reorder or retry anything.
pub trait Executor {
    fn execute(&mut self, command: &Command) -> Result<(), ExecutionError>;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, command: &Command) -> Result<(), ExecutionError> {
        (**self).execute(command)
    }
}

/// Executor invoking the terraform binary
#[derive(Debug, Clone)]
pub struct TerraformExecutor {
    program: PathBuf,
    working_dir: Option<PathBuf>,
}

impl TerraformExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
        }
    }

    /// Run terraform against another root module (`-chdir=<dir>`)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Full argument vector passed to the program for `command`
    pub fn argv(&self, command: &Command) -> Vec<String> {
        let mut argv = Vec::with_capacity(5);
        if let Some(dir) = &self.working_dir {
            argv.push(format!("-chdir={}", dir.display()));
        }
        argv.extend(command.to_cli_args());
        argv
    }

    fn invocation(&self, argv: &[String]) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(argv.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for TerraformExecutor {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl Executor for TerraformExecutor {
    fn execute(&mut self, command: &Command) -> Result<(), ExecutionError> {
        command.validate().map_err(|source| ExecutionError::Invalid {
            command: command.to_string(),
            source,
        })?;

        let argv = self.argv(command);
        let program = self.program.display().to_string();
        info!("Running: {} {:?}", program, argv);

        let mut child = Process::new(&self.program)
            .args(&argv)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .die_with_parent()
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();
        track(pid, true);

        let status = child.wait();
        track(pid, false);

        let status: ExitStatus = status.map_err(|source| ExecutionError::Wait {
            program: program.clone(),
            source,
        })?;

        if status.success() {
            debug!("{} exited successfully", program);
            Ok(())
        } else {
            warn!("{} failed: {}", program, status);
            Err(ExecutionError::Failed {
                invocation: self.invocation(&argv),
                code: status.code(),
            })
        }
    }
}

fn track(pid: u32, running: bool) {
    let registry = ChildRegistry::global();
    let Ok(mut guard) = registry.lock() else {
        warn!("Child registry lock poisoned; PID {} is not tracked", pid);
        return;
    };
    if running {
        guard.register(pid);
    } else {
        guard.unregister(pid);
    }
}
