//! vnode Node Agent
//!
//! Presents a provider as a cluster node.
//!
//! ## Architecture
//!
//! - **Pod Poller**: Lists pods assigned to this node and emits change events
//! - **Event Dispatcher**: Creates and deletes pods at the provider, one worker per pod
//! - **Status Sweeper**: Mirrors provider status into the orchestrator periodically
//! - **Stats API**: Serves the provider's stats summary over HTTP

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vnode_node_agent::api::{create_router, ApiState};
use vnode_node_agent::config::{Config, OrchestratorKind, ProviderKind};
use vnode_node_agent::events::{poll_assigned_pods, PodEventDispatcher, PodEventHandler, PollConfig};
use vnode_node_agent::{
    HttpOrchestrator, InMemoryOrchestrator, MockProvider, Orchestrator, PodLifecycleController,
    Provider, StatusSweeper, SweepConfig, TrackedPodStore,
};

const EVENT_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log level can seed the filter
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting vnode node agent");
    info!(
        node_name = %config.node_name,
        orchestrator = ?config.orchestrator,
        orchestrator_url = %config.orchestrator_url,
        listen_addr = %config.listen_addr,
        provider = ?config.provider,
        "Configuration loaded"
    );

    let provider: Arc<dyn Provider> = match config.provider {
        ProviderKind::Mock => Arc::new(MockProvider::new(config.node_name.clone())),
    };
    let orchestrator: Arc<dyn Orchestrator> = match config.orchestrator {
        OrchestratorKind::Http => Arc::new(HttpOrchestrator::new(config.orchestrator_url.clone())?),
        OrchestratorKind::Memory => {
            warn!("Using in-memory orchestrator, pod records will not persist");
            Arc::new(InMemoryOrchestrator::new())
        }
    };
    let store = Arc::new(TrackedPodStore::new());

    let controller = Arc::new(PodLifecycleController::new(
        config.node_name.clone(),
        provider,
        orchestrator.clone(),
        Arc::clone(&store),
    ));

    let shutdown = CancellationToken::new();

    // Event path: poller -> dispatcher -> per-pod workers
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let dispatcher = PodEventDispatcher::new(Arc::new(PodEventHandler::new(Arc::clone(
        &controller,
    ))));
    let dispatcher_handle = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));

    let poller_handle = tokio::spawn(poll_assigned_pods(
        orchestrator,
        store,
        PollConfig {
            node_name: config.node_name.clone(),
            interval: config.pod_poll_interval(),
        },
        events_tx,
        shutdown.clone(),
    ));

    // Periodic path
    let sweeper = StatusSweeper::new(
        Arc::clone(&controller),
        SweepConfig {
            interval: config.status_sync_interval(),
        },
    );
    let sweeper_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { sweeper.run(shutdown).await }
    });

    // Stats API
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Stats API listening");
    let router = create_router(ApiState::new(Arc::clone(&controller), shutdown.clone()));
    let server_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    shutdown.cancel();

    info!("Waiting for workers to shut down...");
    for (name, result) in [
        ("dispatcher", dispatcher_handle.await),
        ("poller", poller_handle.await),
        ("sweeper", sweeper_handle.await),
    ] {
        if let Err(e) = result {
            error!(task = name, error = %e, "Task panicked");
        }
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Stats API error"),
        Err(e) => error!(error = %e, "Stats API task panicked"),
    }

    info!("Node agent shutdown complete");
    Ok(())
}
