//! Kiln Server
//!
//! Accepts bundle uploads, builds them into container images on the cluster
//! and runs the results as batch jobs or interactive sessions.
//!
//! Architecture:
//! - API: axum handlers for uploads and job queries
//! - Service: ingestion, build, launch and lifecycle tracking
//! - Repository: job registry (in-memory or PostgreSQL)
//! - Cluster: kubectl-driven orchestrator and kaniko build executor

mod api;
mod cluster;
mod config;
mod db;
mod repository;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::cluster::kaniko::KanikoExecutor;
use crate::cluster::kubectl::{KubectlOrchestrator, check_kubectl_available};
use crate::cluster::Orchestrator;
use crate::config::Config;
use crate::repository::{InMemoryJobRegistry, JobRegistry, PgJobRegistry};
use crate::service::build::BuildCoordinator;
use crate::service::ingest::ArtifactIngestor;
use crate::service::job::JobService;
use crate::service::launch::WorkloadLauncher;
use crate::service::lifecycle::LifecycleTracker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Server...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Loaded configuration: namespace={}, upload_dir={}",
        config.cluster.namespace,
        config.ingest.upload_dir.display()
    );

    let registry = create_registry(&config).await?;

    if let Err(e) = check_kubectl_available(&config.cluster.kubectl).await {
        warn!("Cluster is not reachable yet: {}", e);
    }

    tokio::fs::create_dir_all(&config.ingest.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.ingest.upload_dir.display()
            )
        })?;

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(KubectlOrchestrator::new(&config.cluster));
    let executor = Arc::new(KanikoExecutor::new(
        orchestrator.clone(),
        config.build.builder_image.clone(),
        config.build.shared_claim.clone(),
        config.build.context_mount.clone(),
    ));

    let jobs = JobService::new(
        registry,
        ArtifactIngestor::new(&config.ingest),
        BuildCoordinator::new(executor, &config.build),
        WorkloadLauncher::new(orchestrator.clone(), config.launch.clone()),
        LifecycleTracker::new(orchestrator),
        config.ingest.retention,
    );

    let state = AppState {
        jobs: Arc::new(jobs),
        started_at: chrono::Utc::now(),
    };
    let app = api::create_router(state, config.ingest.max_upload_bytes);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}

/// PostgreSQL when a database URL is configured, in-memory otherwise
async fn create_registry(config: &Config) -> Result<Arc<dyn JobRegistry>> {
    let Some(database_url) = &config.database_url else {
        info!("No DATABASE_URL set, using in-memory job registry");
        return Ok(Arc::new(InMemoryJobRegistry::new()));
    };

    info!("Connecting to database...");
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PgJobRegistry::new(pool)))
}
