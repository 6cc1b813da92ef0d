//! 0001 - move_account_alias_to_iam_module

use crate::command::Command;
use crate::error::Result;
use crate::migration::MigrationDefinition;
use crate::registry::Registry;

pub fn migration() -> MigrationDefinition {
    MigrationDefinition::new(
        1,
        "move_account_alias_to_iam_module",
        "Moves the standalone account alias resource into the IAM module",
    )
    .up(Command::move_resource(
        "Move account alias to IAM module",
        "aws_iam_account_alias.alias",
        "module.iam.aws_iam_account_alias.alias[0]",
    ))
    .down(Command::move_resource(
        "Move account alias back to root module",
        "module.iam.aws_iam_account_alias.alias[0]",
        "aws_iam_account_alias.alias",
    ))
}

pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(1, migration)
}
