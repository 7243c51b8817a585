//! `prenv plan <name> [--json]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use prenv_core::{resources, settings, ResourceName};
use prenv_daemon::build_reconciler;
use prenv_reconcile::EventKind;

use super::home_dir;

/// Show the actions one tick would take for a resource.
///
/// Reads the source host and the registry; writes nothing, posts no statuses.
#[derive(Args, Debug)]
pub struct PlanArgs {
    pub name: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = settings::load_at(&home).context("failed to load ~/.prenv/config.yaml")?;
        let resource = resources::load_resource_at(&home, &ResourceName::from(self.name.as_str()))
            .with_context(|| format!("failed to load resource '{}'", self.name))?;

        let plan = build_reconciler(&home, &settings)
            .plan(&resource)
            .with_context(|| format!("failed to plan '{}'", self.name))?;

        if self.json {
            let payload = json!({
                "resource": resource.name,
                "open_change_requests": plan.snapshot.desired.len(),
                "environments": plan.snapshot.observed.len(),
                "actions": plan.actions.iter().map(|action| json!({
                    "kind": action.kind(),
                    "id": action.id(),
                    "description": action.to_string(),
                })).collect::<Vec<_>>(),
                "events": plan.events,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        println!(
            "{} | {} open PRs | {} environments",
            resource.name.0.bold(),
            plan.snapshot.desired.len(),
            plan.snapshot.observed.len(),
        );
        for event in &plan.events {
            if event.kind == EventKind::Warning {
                println!("{} {}: {}", "!".yellow().bold(), event.reason, event.message);
            }
        }
        if plan.actions.is_empty() {
            println!("Nothing to do.");
            return Ok(());
        }
        for action in &plan.actions {
            println!("  {action}");
        }
        Ok(())
    }
}
