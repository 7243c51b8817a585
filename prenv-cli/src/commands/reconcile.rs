//! `prenv reconcile <name> | --all`

use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use colored::Colorize;

use prenv_core::{resources, settings, ResourceName};
use prenv_daemon::{build_reconciler, TickSummary};
use prenv_reconcile::{ActionResult, EventKind};

use super::home_dir;

/// Run one tick per selected resource in the foreground.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Resource to reconcile.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Reconcile every declared resource.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = settings::load_at(&home).context("failed to load ~/.prenv/config.yaml")?;

        let targets = match (&self.name, self.all) {
            (Some(name), _) => vec![resources::load_resource_at(
                &home,
                &ResourceName::from(name.as_str()),
            )
            .with_context(|| format!("failed to load resource '{name}'"))?],
            (None, true) => {
                resources::list_resources_at(&home).context("failed to load resources")?
            }
            (None, false) => return Err(anyhow!("specify a resource name or --all")),
        };

        let reconciler = build_reconciler(&home, &settings);
        let summaries: Vec<TickSummary> = targets
            .iter()
            .map(|resource| {
                let started = Instant::now();
                let outcome = reconciler.tick(resource);
                TickSummary::from_outcome(&resource.name, outcome, started.elapsed())
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summaries)
                    .context("failed to serialize reconcile JSON")?
            );
        } else if summaries.is_empty() {
            println!("No resources declared.");
        } else {
            for summary in &summaries {
                print_summary(summary);
            }
        }

        let failed = summaries.iter().filter(|s| !s.ok).count();
        if failed > 0 {
            bail!("{failed} of {} ticks failed", summaries.len());
        }
        Ok(())
    }
}

/// Human-readable rendering of one tick, shared with `prenv daemon reconcile`.
pub(crate) fn print_summary(summary: &TickSummary) {
    let headline = if summary.ok {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{headline} {} | {} open PRs | {} environments | next tick in {}s | {}ms",
        summary.resource.bold(),
        summary.open_change_requests,
        summary.environments,
        summary.requeue_after_secs,
        summary.duration_ms,
    );
    if let Some(error) = &summary.error {
        println!("  {}", error.red());
    }
    for outcome in &summary.actions {
        println!(
            "  {:<12} PR {:<6} {}",
            outcome.kind.to_string(),
            outcome.id,
            result_label(&outcome.result)
        );
    }
    for event in &summary.events {
        if event.kind == EventKind::Warning {
            println!("  {} {}: {}", "!".yellow().bold(), event.reason, event.message);
        }
    }
}

fn result_label(result: &ActionResult) -> String {
    match result {
        ActionResult::Applied => "applied".to_string(),
        ActionResult::AlreadyExisted => "already existed".to_string(),
        ActionResult::Failed { message } => format!("failed: {message}"),
        ActionResult::Ready => "ready".to_string(),
        ActionResult::NotReady => "not ready yet".to_string(),
        ActionResult::Unchanged => "unchanged".to_string(),
        ActionResult::AlreadyGone => "already gone".to_string(),
    }
}
