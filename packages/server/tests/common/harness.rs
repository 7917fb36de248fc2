//! Test harness with testcontainers for integration testing.
//!
//! Uses a shared PostgreSQL container across all tests for dramatically
//! improved performance. The container and migrations are initialized once
//! on first use, then reused; tests isolate on their own campaign rows.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use server_core::kernel::jobs::PostgresJobQueue;
use server_core::kernel::{
    EngineKernel, QueryPerformanceRecorder, StreamHub, TransactionManager,
};

// =============================================================================
// Shared Test Infrastructure
// =============================================================================

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Respect RUST_LOG when debugging tests; ignore re-init races.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

// =============================================================================
// Per-test harness
// =============================================================================

/// Per-test handle to the shared database plus an assembled kernel.
pub struct TestHarness {
    pub pool: PgPool,
    pub kernel: Arc<EngineKernel>,
    pub queue: Arc<PostgresJobQueue>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let infra = SharedTestInfra::get().await;
        let pool = PgPool::connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");

        let queue = Arc::new(PostgresJobQueue::new(pool.clone()));
        // Metrics receiver is dropped: recorder sends become no-ops in tests.
        let (metrics, _metrics_rx) = QueryPerformanceRecorder::channel(100, 64);
        let kernel = Arc::new(EngineKernel::new(
            pool.clone(),
            TransactionManager::new(pool.clone()),
            queue.clone(),
            StreamHub::new(),
            metrics,
        ));

        Self {
            pool,
            kernel,
            queue,
        }
    }
}
