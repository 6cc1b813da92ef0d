//! Plain-text rendering of status, version and plans.
//!
//! Colors are added by the binary; everything here is uncolored so it can
//! be asserted on.

use chrono::{DateTime, Local, Utc};

use crate::discovery::DiscoveredMigration;
use crate::engine::{Plan, StatusEntry};
use crate::migration::{Direction, MigrationStatus};
use crate::state::AppliedRecord;

const NAME_WIDTH: usize = 30;

/// Shorten `s` to at most `max` characters, ending in "..."
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Header line of the status table
pub fn status_header() -> String {
    format!(
        "{:<8}  {:<width$}  {:<10}  {}",
        "Version",
        "Name",
        "Status",
        "Applied At",
        width = NAME_WIDTH
    )
}

/// One row of the status table
pub fn status_row(entry: &StatusEntry) -> String {
    let applied_at = entry
        .applied_at
        .as_ref()
        .map(local_time)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:04}      {:<width$}  {:<10}  {}",
        entry.version,
        truncate(&entry.name, NAME_WIDTH),
        entry.status.to_string(),
        applied_at,
        width = NAME_WIDTH
    )
}

/// Summary counts shown under the status table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusTotals {
    pub registered: usize,
    pub applied: usize,
    pub pending: usize,
    pub orphaned: usize,
}

pub fn totals(entries: &[StatusEntry]) -> StatusTotals {
    entries.iter().fold(StatusTotals::default(), |mut t, e| {
        match e.status {
            MigrationStatus::Applied => {
                t.registered += 1;
                t.applied += 1;
            }
            MigrationStatus::Pending => {
                t.registered += 1;
                t.pending += 1;
            }
            MigrationStatus::Orphaned => t.orphaned += 1,
        }
        t
    })
}

/// Migration files present on disk but missing from the registry
pub fn unregistered_files<'a>(
    entries: &[StatusEntry],
    on_disk: &'a [DiscoveredMigration],
) -> Vec<&'a DiscoveredMigration> {
    on_disk
        .iter()
        .filter(|m| {
            !entries
                .iter()
                .any(|e| e.version == m.version && e.status != MigrationStatus::Orphaned)
        })
        .collect()
}

/// `version` output
pub fn current_version(current: Option<&AppliedRecord>) -> String {
    match current {
        None => "Current version: 0 (no migrations applied)".to_string(),
        Some(record) => format!(
            "Current version: {:04} ({})\nApplied at: {}",
            record.version,
            record.name,
            local_time(&record.applied_at)
        ),
    }
}

/// `--dry-run` output: every migration and command the batch would run
pub fn plan(plan: &Plan) -> String {
    if plan.is_empty() {
        return match plan.direction {
            Direction::Up => "No pending migrations".to_string(),
            Direction::Down => "No migrations to roll back".to_string(),
        };
    }

    let verb = match plan.direction {
        Direction::Up => "apply",
        Direction::Down => "roll back",
    };
    let mut out = format!("Would {} {} migration(s):\n", verb, plan.steps.len());
    for m in &plan.steps {
        out.push_str(&format!("  {:04} {}\n", m.version, m.name));
        let commands = m.commands(plan.direction);
        if commands.is_empty() {
            out.push_str("      (no commands)\n");
        }
        for command in commands {
            out.push_str(&format!("      {}  # {}\n", command, command.description));
        }
    }
    out
}
