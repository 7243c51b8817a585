//! `prenv status` — last persisted tick status per resource.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use prenv_core::{
    resources, status_store, ConditionStatus, ConditionType, ControllerResource,
    ControllerStatus, ControllerStatusMessage, ResourceName,
};

use super::home_dir;

/// Arguments for `prenv status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this resource.
    pub name: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ResourceStatusJson {
    name: String,
    repository: String,
    status: Option<ControllerStatus>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "message")]
    message: String,
    #[tabled(rename = "converged")]
    converged: String,
    #[tabled(rename = "open PRs")]
    open: usize,
    #[tabled(rename = "environments")]
    environments: usize,
    #[tabled(rename = "last tick")]
    last_tick: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut declared =
            resources::list_resources_at(&home).context("failed to load resources")?;
        if let Some(name) = self.name.as_ref() {
            declared.retain(|resource| resource.name.0 == *name);
            if declared.is_empty() {
                anyhow::bail!("resource '{name}' is not declared");
            }
        }

        let rows = load_statuses(&home, declared)?;
        if self.json {
            print_json(rows)?;
        } else {
            print_table(rows, Utc::now());
        }
        Ok(())
    }
}

fn load_statuses(
    home: &Path,
    declared: Vec<ControllerResource>,
) -> Result<Vec<(ControllerResource, Option<ControllerStatus>)>> {
    declared
        .into_iter()
        .map(|resource| {
            let status = status_store::load_at(home, &resource.name)
                .with_context(|| format!("failed to load status for '{}'", resource.name))?;
            Ok((resource, status))
        })
        .collect()
}

fn print_json(rows: Vec<(ControllerResource, Option<ControllerStatus>)>) -> Result<()> {
    let payload: Vec<ResourceStatusJson> = rows
        .into_iter()
        .map(|(resource, status)| ResourceStatusJson {
            repository: resource.spec.github_pr_repository.repo_ref().to_string(),
            name: resource.name.0,
            status,
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<(ControllerResource, Option<ControllerStatus>)>, now: DateTime<Utc>) {
    println!(
        "prenv v{} | {} resources | {} failing",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        rows.iter()
            .filter(|(_, status)| status
                .as_ref()
                .and_then(|s| s.message)
                .map(|m| m.is_failure())
                .unwrap_or(false))
            .count(),
    );

    if rows.is_empty() {
        println!("No resources declared.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|(resource, status)| table_row(&resource.name, status.as_ref(), now))
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn table_row(
    name: &ResourceName,
    status: Option<&ControllerStatus>,
    now: DateTime<Utc>,
) -> StatusTableRow {
    let Some(status) = status else {
        return StatusTableRow {
            resource: name.0.clone(),
            message: "never reconciled".bright_black().to_string(),
            converged: "-".to_string(),
            open: 0,
            environments: 0,
            last_tick: "never".to_string(),
        };
    };

    StatusTableRow {
        resource: name.0.clone(),
        message: message_label(status.message),
        converged: match status
            .condition(ConditionType::EnvironmentsConverged)
            .map(|c| (c.status, c.reason.as_str()))
        {
            Some((ConditionStatus::True, _)) => "yes".green().to_string(),
            Some((_, reason)) => reason.yellow().to_string(),
            None => "-".to_string(),
        },
        open: status.open_change_requests,
        environments: status.environments,
        last_tick: status
            .last_tick_at
            .map(|at| format_age(now, at))
            .unwrap_or_else(|| "never".to_string()),
    }
}

fn message_label(message: Option<ControllerStatusMessage>) -> String {
    match message {
        None => "-".to_string(),
        Some(message) if message.is_failure() => message.as_str().red().bold().to_string(),
        Some(ControllerStatusMessage::Ready) => "Ready".green().to_string(),
        Some(message) => message.as_str().to_string(),
    }
}

fn format_age(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn ages_are_rounded_down_to_the_largest_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now, now - Duration::seconds(5)), "5s ago");
        assert_eq!(format_age(now, now - Duration::seconds(125)), "2m ago");
        assert_eq!(format_age(now, now - Duration::hours(3)), "3h ago");
        assert_eq!(format_age(now, now - Duration::days(2)), "2d ago");
        assert_eq!(format_age(now, now + Duration::seconds(5)), "0s ago");
    }

    #[test]
    fn unreconciled_resource_row_says_never() {
        colored::control::set_override(false);
        let row = table_row(&ResourceName::from("shop"), None, Utc::now());
        assert_eq!(row.message, "never reconciled");
        assert_eq!(row.last_tick, "never");
    }
}
