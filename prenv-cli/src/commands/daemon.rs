//! `prenv daemon` — background reconcile loop lifecycle.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use prenv_core::paths::socket_path;
use prenv_daemon::{request_reconcile, request_status, request_stop, start_blocking, DaemonError};

use super::home_dir;
use super::reconcile::print_summary;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (workers + watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the running daemon to tick now and wait for the result.
    Reconcile {
        /// Only this resource; every resource when omitted.
        name: Option<String>,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                let mut payload =
                    serde_json::to_value(&status).context("failed to render daemon status JSON")?;
                payload["running"] = serde_json::Value::Bool(true);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Reconcile { name, json } => {
            let summaries = match request_reconcile(&home, name) {
                Ok(summaries) => summaries,
                Err(DaemonError::DaemonNotRunning { .. }) => {
                    bail!("daemon is not running; use `prenv reconcile` to tick in the foreground")
                }
                Err(err) => return Err(err).context("daemon reconcile failed"),
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summaries)
                        .context("failed to serialize reconcile JSON")?
                );
            } else {
                for summary in &summaries {
                    print_summary(summary);
                }
            }
        }
    }

    Ok(())
}
