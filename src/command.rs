//! Terraform state operations.
//!
//! A [`Command`] is one atomic mutation of the external state: move, remove
//! or import a resource address. Each kind carries exactly the arguments it
//! needs, so a well-typed `Command` cannot have the wrong arity. Untyped input
//! (the legacy `{type, description, args}` shape) goes through
//! [`Command::from_parts`], which validates before anything is built.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Errors raised while building a command from untyped parts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Argument count does not match the kind
    #[error("'{kind}' takes {expected} argument(s), got {actual}")]
    Arity {
        kind: CommandKind,
        expected: usize,
        actual: usize,
    },

    /// An address or id is blank
    #[error("'{kind}' argument {position} is empty")]
    EmptyArgument { kind: CommandKind, position: usize },

    /// Unrecognized operation name
    #[error("unknown command type '{0}' (expected mv, rm or import)")]
    UnknownKind(String),
}

/// The closed set of state operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum CommandKind {
    #[strum(serialize = "mv")]
    #[serde(rename = "mv")]
    Move,
    #[strum(serialize = "rm")]
    #[serde(rename = "rm")]
    Remove,
    #[strum(serialize = "import")]
    #[serde(rename = "import")]
    Import,
}

impl CommandKind {
    /// Number of arguments this kind takes
    pub const fn arity(self) -> usize {
        match self {
            Self::Move => 2,
            Self::Remove => 1,
            Self::Import => 2,
        }
    }
}

/// A state operation with its fixed-arity payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOp {
    /// `terraform state mv <from> <to>`
    Move { from: String, to: String },
    /// `terraform state rm <address>`
    Remove { address: String },
    /// `terraform import <address> <id>`
    Import { address: String, id: String },
}

impl StateOp {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Move { .. } => CommandKind::Move,
            Self::Remove { .. } => CommandKind::Remove,
            Self::Import { .. } => CommandKind::Import,
        }
    }

    /// Operation arguments in declared order
    pub fn args(&self) -> Vec<&str> {
        match self {
            Self::Move { from, to } => vec![from.as_str(), to.as_str()],
            Self::Remove { address } => vec![address.as_str()],
            Self::Import { address, id } => vec![address.as_str(), id.as_str()],
        }
    }
}

/// One step of a migration: an operation plus a human description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub op: StateOp,
    pub description: String,
}

impl Command {
    /// Move a resource from one address to another
    pub fn move_resource(
        description: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            op: StateOp::Move {
                from: from.into(),
                to: to.into(),
            },
            description: description.into(),
        }
    }

    /// Remove a resource from state (the real resource is left alone)
    pub fn remove(description: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            op: StateOp::Remove {
                address: address.into(),
            },
            description: description.into(),
        }
    }

    /// Import an existing resource into state
    pub fn import(
        description: impl Into<String>,
        address: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            op: StateOp::Import {
                address: address.into(),
                id: id.into(),
            },
            description: description.into(),
        }
    }

    /// Build a command from a kind and an untyped argument list.
    ///
    /// # Errors
    ///
    /// - `Arity` if the number of arguments does not match the kind
    /// - `EmptyArgument` if any argument is blank
    pub fn from_parts(
        kind: CommandKind,
        description: impl Into<String>,
        args: Vec<String>,
    ) -> Result<Self, CommandError> {
        if args.len() != kind.arity() {
            return Err(CommandError::Arity {
                kind,
                expected: kind.arity(),
                actual: args.len(),
            });
        }
        if let Some(position) = args.iter().position(|a| a.trim().is_empty()) {
            return Err(CommandError::EmptyArgument {
                kind,
                position: position + 1,
            });
        }

        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or_default();
        let op = match kind {
            CommandKind::Move => StateOp::Move {
                from: next(),
                to: next(),
            },
            CommandKind::Remove => StateOp::Remove { address: next() },
            CommandKind::Import => StateOp::Import {
                address: next(),
                id: next(),
            },
        };

        Ok(Self {
            op,
            description: description.into(),
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.op.kind()
    }

    /// Re-check the payload before invocation.
    ///
    /// The variant fixes the arity; what can still go wrong is a blank
    /// address built through the typed constructors.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self.op.args().iter().position(|a| a.trim().is_empty()) {
            Some(position) => Err(CommandError::EmptyArgument {
                kind: self.kind(),
                position: position + 1,
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.op.args().join(" "))
    }
}

/// Untyped command as it appears in JSON (`{"type": "mv", ...}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TryFrom<RawCommand> for Command {
    type Error = CommandError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let kind: CommandKind = raw
            .kind
            .parse()
            .map_err(|_| CommandError::UnknownKind(raw.kind.clone()))?;
        Command::from_parts(kind, raw.description, raw.args)
    }
}

impl From<&Command> for RawCommand {
    fn from(command: &Command) -> Self {
        Self {
            kind: command.kind().to_string(),
            description: command.description.clone(),
            args: command.op.args().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Mapping from a typed operation to the terraform argument vector.
///
/// # Contract
///
/// - `to_cli_args()` returns the arguments exactly as terraform expects them,
///   one element per argv entry. Nothing is quoted or joined; addresses such
///   as `module.x.aws_y.z["a b"]` pass through untouched.
pub trait TerraformArgs {
    /// Arguments after the terraform program name (and global flags)
    fn to_cli_args(&self) -> Vec<String>;
}

impl TerraformArgs for StateOp {
    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Move { from, to } => {
                vec!["state".into(), "mv".into(), from.clone(), to.clone()]
            }
            Self::Remove { address } => vec!["state".into(), "rm".into(), address.clone()],
            Self::Import { address, id } => vec!["import".into(), address.clone(), id.clone()],
        }
    }
}

impl TerraformArgs for Command {
    fn to_cli_args(&self) -> Vec<String> {
        self.op.to_cli_args()
    }
}
