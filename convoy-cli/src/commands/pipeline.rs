//! Pipeline command handlers
//!
//! Start, list, inspect and cancel pipelines.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use convoy_client::OrchestratorClient;
use convoy_core::domain::pipeline::{Pipeline, PipelinePhase, SpawnMode, TaskStatus};
use convoy_core::dto::pipeline::{PipelineSummary, StartPipeline};

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Start a pipeline for a repository goal
    Start {
        /// Repository URL (https://, http:// or git@)
        #[arg(short, long)]
        repo: String,

        /// What the agents should achieve
        #[arg(short, long)]
        goal: String,

        /// Model provider the agents use
        #[arg(short, long, default_value = "anthropic")]
        provider: String,

        #[arg(short, long)]
        model: Option<String>,

        /// Upper bound on parallel agents
        #[arg(long)]
        max_agents: Option<usize>,

        #[arg(long)]
        agent_type: Option<String>,

        /// Spawn backend (local or remote)
        #[arg(long)]
        spawn_mode: Option<SpawnMode>,

        /// Token forwarded to agents for pushing branches
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Cancel a pipeline and stop its agents
    Cancel {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Routes pipeline subcommands to their respective handlers
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Start {
            repo,
            goal,
            provider,
            model,
            max_agents,
            agent_type,
            spawn_mode,
            github_token,
        } => {
            let req = StartPipeline {
                repo_url: repo,
                goal,
                provider,
                model,
                github_token,
                max_agents,
                agent_type,
                spawn_mode,
            };
            start_pipeline(&client, req).await
        }
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Cancel { id } => cancel_pipeline(&client, &id).await,
    }
}

async fn start_pipeline(client: &OrchestratorClient, req: StartPipeline) -> Result<()> {
    let started = client.start_pipeline(req).await?;

    println!("{}", "✓ Pipeline started!".green().bold());
    println!("  ID:    {}", started.pipeline_id.to_string().cyan());
    println!("  Phase: {}", colored_phase(started.phase));
    println!(
        "{}",
        format!(
            "  Follow with: convoy pipeline get {}",
            &started.pipeline_id.simple().to_string()[..8]
        )
        .dimmed()
    );

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

async fn cancel_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let pipeline = client.cancel_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} cancelled", uuid).green().bold()
    );
    println!("  Phase: {}", colored_phase(pipeline.phase));

    Ok(())
}

fn colored_phase(phase: PipelinePhase) -> ColoredString {
    let text = phase.to_string();
    match phase {
        PipelinePhase::Completed => text.green(),
        PipelinePhase::Failed => text.red(),
        _ => text.yellow(),
    }
}

fn colored_task_status(status: TaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Completed => text.green(),
        TaskStatus::Failed => text.red(),
        TaskStatus::Running => text.cyan(),
        TaskStatus::Pending => text.dimmed(),
    }
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.goal.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Repo:    {}", pipeline.repo_url);
    println!(
        "    Phase:   {} ({}/{} done, {} failed)",
        colored_phase(pipeline.phase),
        pipeline.completed_tasks,
        pipeline.task_count,
        pipeline.failed_tasks
    );
    println!(
        "    Started: {}",
        pipeline
            .started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:        {}", pipeline.id.to_string().cyan());
    println!("  Goal:      {}", pipeline.goal.bold());
    println!("  Repo:      {}", pipeline.repo_url);
    println!("  Provider:  {}", pipeline.provider);
    if let Some(model) = &pipeline.model {
        println!("  Model:     {}", model);
    }
    println!("  Spawn:     {}", pipeline.spawn_mode);
    println!("  Phase:     {}", colored_phase(pipeline.phase));
    println!(
        "  Started:   {}",
        pipeline.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed_at) = pipeline.completed_at {
        println!("  Completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &pipeline.error {
        println!("  Error:     {}", error.red());
    }

    println!("\n{}", "Tasks:".bold());
    println!("{}", "─".repeat(80).dimmed());
    for task in &pipeline.tasks {
        println!(
            "  {} {} [{}]",
            task.id.cyan(),
            task.title.bold(),
            colored_task_status(task.status)
        );
        println!("    Branch: {}", task.branch.dimmed());
        if let Some(agent_id) = &task.agent_id {
            println!("    Agent:  {}", agent_id.dimmed());
        }
        if let Some(commit) = &task.commit_ref {
            println!("    Commit: {}", commit);
        }
        if let Some(message) = &task.message {
            println!("    Status: {}", message.dimmed());
        }
        if let Some(error) = &task.error {
            println!("    Error:  {}", error.red());
        }
    }
    println!("{}", "─".repeat(80).dimmed());
}
