//! Lifecycle command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use convoy_client::OrchestratorClient;
use convoy_core::domain::lifecycle::{LifecycleState, LifecycleStatus};
use convoy_core::dto::lifecycle::{
    ExtendGraceRequest, HoldRequest, OperationResult, RebuildRequest, RestartRequest,
    ShutdownRequest,
};

use crate::config::Config;

/// Lifecycle subcommands
#[derive(Subcommand)]
pub enum LifecycleCommands {
    /// Show the host lifecycle state
    Status,
    /// List active sessions
    Sessions,
    /// Keep the host alive for a while
    Hold {
        /// Minutes to hold
        #[arg(short, long, default_value = "60")]
        minutes: u64,

        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Release an active hold
    Release,
    /// Push a pending shutdown further out
    Extend {
        /// Extra minutes
        #[arg(short, long, default_value = "10")]
        minutes: u64,
    },
    /// Shut the host down
    Shutdown {
        /// Skip the grace period
        #[arg(short, long)]
        force: bool,

        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Restart the orchestrator
    Restart {
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Rebuild the orchestrator from a branch
    Rebuild {
        branch: String,

        #[arg(long)]
        commit: Option<String>,

        #[arg(short, long)]
        reason: Option<String>,
    },
}

/// Routes lifecycle subcommands to their respective handlers
pub async fn handle_lifecycle_command(command: LifecycleCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        LifecycleCommands::Status => show_status(&client).await,
        LifecycleCommands::Sessions => list_sessions(&client).await,
        LifecycleCommands::Hold { minutes, reason } => {
            let held = client
                .hold(HoldRequest {
                    duration_minutes: minutes,
                    reason,
                })
                .await?;
            println!(
                "{}",
                format!(
                    "✓ Host held until {}",
                    held.hold_until.format("%Y-%m-%d %H:%M:%S UTC")
                )
                .green()
                .bold()
            );
            Ok(())
        }
        LifecycleCommands::Release => {
            print_result("Hold released", client.release_hold().await?);
            Ok(())
        }
        LifecycleCommands::Extend { minutes } => {
            let extended = client
                .extend_grace_period(ExtendGraceRequest {
                    additional_minutes: minutes,
                })
                .await?;
            if extended.success {
                println!(
                    "{}",
                    format!(
                        "✓ Grace period extended, {}s remaining",
                        extended.remaining_secs.unwrap_or_default()
                    )
                    .green()
                    .bold()
                );
            } else {
                println!(
                    "{} {}",
                    "✗".red().bold(),
                    extended.reason.unwrap_or_default().red()
                );
            }
            Ok(())
        }
        LifecycleCommands::Shutdown { force, reason } => {
            let result = client.shutdown(ShutdownRequest { force, reason }).await?;
            print_result(
                if force {
                    "Shutdown started"
                } else {
                    "Shutdown scheduled"
                },
                result,
            );
            Ok(())
        }
        LifecycleCommands::Restart { reason } => {
            print_result(
                "Restart started",
                client.restart(RestartRequest { reason }).await?,
            );
            Ok(())
        }
        LifecycleCommands::Rebuild {
            branch,
            commit,
            reason,
        } => {
            let result = client
                .rebuild(RebuildRequest {
                    branch,
                    commit_sha: commit,
                    reason,
                })
                .await?;
            print_result("Rebuild requested", result);
            Ok(())
        }
    }
}

fn print_result(success: &str, result: OperationResult) {
    if result.success {
        println!("{}", format!("✓ {}", success).green().bold());
    } else {
        println!(
            "{} {}",
            "✗".red().bold(),
            result.reason.unwrap_or_default().red()
        );
    }
}

fn colored_status(status: LifecycleStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        LifecycleStatus::Running => text.green(),
        LifecycleStatus::GracePeriod => text.yellow(),
        LifecycleStatus::Held => text.cyan(),
        LifecycleStatus::ShuttingDown => text.red(),
    }
}

async fn show_status(client: &OrchestratorClient) -> Result<()> {
    let state: LifecycleState = client.lifecycle_status().await?;

    println!("{}", "Lifecycle:".bold());
    println!("  Status:        {}", colored_status(state.status));
    println!("  Uptime:        {}s", state.uptime_secs);
    println!("  Sessions:      {}", state.active_sessions);
    println!(
        "  Last activity: {}",
        state.last_activity.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(until) = state.hold_until {
        println!(
            "  Held until:    {} ({})",
            until.format("%Y-%m-%d %H:%M:%S"),
            state.hold_reason.unwrap_or_default().dimmed()
        );
    }
    if let Some(remaining) = state.grace_remaining_secs {
        println!("  Shutdown in:   {}s", remaining.to_string().yellow());
    }
    if let Some(reason) = state.shutdown_reason {
        println!("  Reason:        {}", reason.to_string().red());
    }

    Ok(())
}

async fn list_sessions(client: &OrchestratorClient) -> Result<()> {
    let sessions = client.list_sessions().await?;

    if sessions.is_empty() {
        println!("{}", "No active sessions.".yellow());
        return Ok(());
    }

    println!("{}", format!("{} active session(s):", sessions.len()).bold());
    for session in sessions {
        println!("  {} {}", "▸".cyan(), session.id.to_string().bold());
        if let Some(agent_id) = &session.agent_id {
            println!("    Agent:    {}", agent_id);
        }
        if let Some(task_id) = &session.task_id {
            println!("    Task:     {}", task_id);
        }
        println!(
            "    Activity: {}",
            session
                .last_activity
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
    }

    Ok(())
}
