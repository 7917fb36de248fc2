// Main entry point for the campaign engine daemon

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_core::domains::campaigns::{
    runtime::register_phase_handlers, CampaignMachine, ControlPlane, ExecutorRegistry,
};
use server_core::kernel::jobs::{JobRegistry, JobWorker, JobWorkerConfig, PostgresJobQueue};
use server_core::kernel::metrics::DEFAULT_QUEUE_CAPACITY;
use server_core::kernel::{
    spawn_service, EngineKernel, IdempotencySweeper, MetricsWriter, QueryPerformanceRecorder,
    StreamHub, TransactionManager,
};
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting lead-generation campaign engine");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Assemble the kernel
    let tx = TransactionManager::new(pool.clone());
    let queue = Arc::new(PostgresJobQueue::with_lease_duration(
        pool.clone(),
        config.job_lease_ms,
    ));
    let (metrics, metrics_rx) =
        QueryPerformanceRecorder::channel(config.slow_query_threshold_ms, DEFAULT_QUEUE_CAPACITY);
    let kernel = Arc::new(EngineKernel::new(
        pool.clone(),
        tx,
        queue.clone(),
        StreamHub::new(),
        metrics,
    ));

    // Wire the campaign runtime. Phase executor packages register their
    // implementations on this registry before the workers start.
    let machine = Arc::new(CampaignMachine::new(kernel.clone()));
    let executors = Arc::new(ExecutorRegistry::new());
    let mut job_registry = JobRegistry::new();
    register_phase_handlers(&mut job_registry, executors.clone(), machine.clone());
    let job_registry = Arc::new(job_registry);

    let control = Arc::new(ControlPlane::new(kernel.clone()));
    tracing::info!(
        executors = ?executors.registered_phases(),
        handlers = ?job_registry.registered_types(),
        "campaign runtime wired"
    );

    // Background services
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    handles.push(spawn_service(
        Box::new(MetricsWriter::new(
            pool.clone(),
            metrics_rx,
            config.slow_query_threshold_ms,
        )),
        shutdown.clone(),
    ));
    handles.push(spawn_service(
        Box::new(IdempotencySweeper::new(control.cache().clone())),
        shutdown.clone(),
    ));
    for index in 0..config.worker_count {
        let worker_config = JobWorkerConfig::with_worker_id(format!("engine-worker-{index}"));
        handles.push(spawn_service(
            Box::new(JobWorker::with_config(
                queue.clone(),
                job_registry.clone(),
                worker_config,
            )),
            shutdown.clone(),
        ));
    }
    tracing::info!(workers = config.worker_count, "engine running");

    // Run until interrupted, then drain
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, draining...");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("Engine stopped");

    Ok(())
}
