// EngineKernel - core infrastructure with all dependencies
//
// The EngineKernel holds the shared infrastructure (pool, transaction
// manager, job queue, stream hub, metrics) and is constructed once at
// startup, then passed by Arc. Nothing in the engine reaches for shared
// state through a global.

use std::sync::Arc;

use sqlx::PgPool;

use super::jobs::JobQueue;
use super::metrics::QueryPerformanceRecorder;
use super::stream_hub::StreamHub;
use super::tx::{PreparedStatementManager, TransactionManager};

/// EngineKernel holds the shared engine infrastructure
pub struct EngineKernel {
    pub db_pool: PgPool,
    /// Owner of every transaction lifecycle
    pub tx: TransactionManager,
    /// Prepared-statement tracking
    pub statements: PreparedStatementManager,
    /// Job queue for phase work
    pub job_queue: Arc<dyn JobQueue>,
    /// In-process pub/sub for post-commit notifications
    pub hub: StreamHub,
    /// Side-channel recorder for slow/failed queries
    pub metrics: QueryPerformanceRecorder,
}

impl EngineKernel {
    /// Creates a new EngineKernel with the given dependencies
    pub fn new(
        db_pool: PgPool,
        tx: TransactionManager,
        job_queue: Arc<dyn JobQueue>,
        hub: StreamHub,
        metrics: QueryPerformanceRecorder,
    ) -> Self {
        Self {
            db_pool,
            tx,
            statements: PreparedStatementManager::new(),
            job_queue,
            hub,
            metrics,
        }
    }
}
