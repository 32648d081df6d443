//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod lifecycle;
mod pipeline;

pub use lifecycle::LifecycleCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Host lifecycle control
    Lifecycle {
        #[command(subcommand)]
        command: LifecycleCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Lifecycle { command } => {
            lifecycle::handle_lifecycle_command(command, config).await
        }
    }
}
