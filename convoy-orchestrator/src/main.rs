use anyhow::{Context, Result};
use convoy_core::domain::lifecycle::ShutdownReason;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_orchestrator::api::{self, AppState};
use convoy_orchestrator::config::Config;
use convoy_orchestrator::repository::SnapshotStore;
use convoy_orchestrator::service::{LifecycleController, PipelineOrchestrator, WebhookNotifier};
use convoy_orchestrator::spawn::{BashScriptBuilder, LocalSpawnProvider, RemoteSpawnProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Convoy Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: public_url={}, state_dir={}, spawn_mode={}",
        config.public_url,
        config.state_dir.display(),
        config.default_spawn_mode
    );

    // Snapshot store doubles as the lifecycle's work counter
    let store = SnapshotStore::new(config.snapshot_dir());
    store
        .init()
        .await
        .context("Failed to create snapshot directory")?;

    let lifecycle = LifecycleController::new(
        config.lifecycle_config(),
        Arc::new(store.clone()),
        Arc::new(exit_process),
    );

    // Spawn providers
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let local = LocalSpawnProvider::new(config.agent_work_root(), exit_tx);
    let mut builder =
        PipelineOrchestrator::builder(config.orchestrator_config(), store, lifecycle.clone())
            .provider(Arc::new(local))
            .scripts(Arc::new(BashScriptBuilder::new(config.agent_command.clone())));

    match config.remote_config() {
        Some(remote) => {
            info!("Remote spawning enabled via {}", remote.api_url);
            builder = builder.provider(Arc::new(RemoteSpawnProvider::new(remote)));
        }
        None => info!("No machines API token configured, remote spawning disabled"),
    }

    let orchestrator = builder.build();
    orchestrator.spawn_exit_reconciler(exit_rx);

    if let Some(url) = &config.webhook_url {
        let notifier = WebhookNotifier::new(url.clone()).context("Failed to build webhook client")?;
        notifier.spawn(lifecycle.subscribe(), orchestrator.subscribe());
        info!("Webhook notifications enabled");
    }

    tokio::spawn(lifecycle.clone().run());
    tokio::spawn(watch_signals(lifecycle.clone()));

    // Build router with all API endpoints
    if config.api_token.is_none() {
        warn!("CONVOY_API_TOKEN not set, control API is unauthenticated");
    }
    let state = AppState::new(orchestrator, lifecycle.clone(), config.api_token.clone());
    let app = api::create_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let mut accept_closed = lifecycle.accept_closed();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = accept_closed.wait_for(|closed| *closed).await;
        })
        .await
        .context("Server error")?;

    let code = lifecycle.exit_code().await;
    info!("Server stopped, exiting with code {}", code);
    std::process::exit(code);
}

fn exit_process(code: i32) {
    std::process::exit(code)
}

/// Turns SIGINT / SIGTERM into a forced lifecycle shutdown
async fn watch_signals(lifecycle: LifecycleController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!("Received {}, shutting down", signal);
    lifecycle
        .force_shutdown(ShutdownReason::Signal {
            signal: signal.to_string(),
        })
        .await;
}
