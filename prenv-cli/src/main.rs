//! prenv — per-pull-request preview environments.
//!
//! # Usage
//!
//! ```text
//! prenv resource add <name> --user <u> --repo <r> --token-secret <ns>/<name> --flux-source <src> --chart-path <path>
//! prenv resource list|show <name>|remove <name>
//! prenv plan <name> [--json]
//! prenv reconcile <name> | --all [--json]
//! prenv status [<name>] [--json]
//! prenv daemon start|stop|status|reconcile [<name>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, plan::PlanArgs, reconcile::ReconcileArgs, resource::ResourceCommand,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "prenv",
    version,
    about = "Keep one preview environment per open pull request",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Declare, inspect, and remove reconciled resources.
    Resource {
        #[command(subcommand)]
        command: ResourceCommand,
    },

    /// Show what one tick would do, without changing anything.
    Plan(PlanArgs),

    /// Run one tick now, in this process.
    Reconcile(ReconcileArgs),

    /// Show the last persisted status of each resource.
    Status(StatusArgs),

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Resource { command } => commands::resource::run(command),
        Commands::Plan(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
