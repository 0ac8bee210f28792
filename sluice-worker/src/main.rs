//! Sluice Worker
//!
//! A session-scoped build pipeline orchestrator. It pulls build requests
//! from a queue, drives each session through a build job and a deploy job,
//! and streams progress to connected UIs over WebSockets.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Hub and registry: Per-session subscribers and in-flight pipelines
//! - Services: Trigger, discovery, completion polling, log tailing,
//!   checkpointing and the pipeline flow built from them
//! - Scheduler: Queue consumption and pipeline lifecycle
//! - API: Health, session view and WebSocket stream
//!
//! Ctrl-C stops pulling, cancels running pipelines (their checkpoints are
//! kept, so redelivered messages resume) and shuts the server down.

mod api;
mod config;
mod context;
mod error;
mod hub;
mod registry;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use sluice_client::GcpClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::context::PipelineContext;
use crate::hub::SubscriberHub;
use crate::registry::ActiveSessions;
use crate::scheduler::Ingestor;
use crate::service::{Backends, PipelineFlow};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sluice_worker=info,sluice_client=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sluice Worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: project={}, region={}, builder={}, deployer={}, subscription={}",
        config.project_id,
        config.region,
        config.builder_job,
        config.deployer_job,
        config.subscription
    );
    let context = PipelineContext::from_config(&config);
    if context.is_local() {
        info!(
            "Local mode: builds run from {}",
            config.local_builder_dir.display()
        );
    }

    // Initialize backend client
    let client = GcpClient::new(config.project_id.clone())
        .await
        .context("Failed to initialize Google Cloud client")?;
    let backends = Backends {
        jobs: Arc::new(client.clone()),
        logs: Arc::new(client.clone()),
        store: Arc::new(client.bucket(context.bucket.clone())),
    };
    let queue = Arc::new(client.subscription(&context.subscription));

    info!("Backend client initialized");

    // Shared registries
    let hub = SubscriberHub::new();
    let sessions = ActiveSessions::new();
    let shutdown = CancellationToken::new();

    let flow = Arc::new(PipelineFlow::new(Arc::clone(&context), backends));
    let ingestor = Arc::new(Ingestor::new(
        queue,
        flow,
        Arc::clone(&hub),
        Arc::clone(&sessions),
        config.max_parallel_pipelines,
        config.queue_poll_interval,
        config.ack_extension,
        shutdown.clone(),
    ));

    // Start HTTP server
    let app = api::create_router(AppState {
        hub: Arc::clone(&hub),
        sessions: Arc::clone(&sessions),
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
        signal_shutdown.cancel();
    });

    // Start ingestion loop; returns after shutdown once pipelines drained
    info!("Starting ingestion from {}", context.subscription);
    if let Err(e) = ingestor.run().await {
        error!("Ingestion error: {:#}", e);
        shutdown.cancel();
        return Err(e);
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    info!("Sluice Worker stopped");
    Ok(())
}
