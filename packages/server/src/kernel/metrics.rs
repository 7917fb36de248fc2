//! Query-performance registry.
//!
//! Stores record slow or failed queries through [`QueryPerformanceRecorder`];
//! samples flow through a bounded channel to a background writer so the
//! originating query is never blocked. When the channel is full the sample is
//! dropped with a warning rather than applying backpressure.
//!
//! The writer also snapshots connection-pool gauges on a fixed interval into
//! `connection_pool_metrics`, keeping a single background writer for all
//! side-channel telemetry.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::kernel::service::Service;

/// Default slow-query threshold.
pub const DEFAULT_THRESHOLD_MS: i64 = 100;

/// Default capacity of the sample channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One observed query execution.
#[derive(Debug, Clone)]
pub struct QuerySample {
    pub query_type: String,
    pub execution_time_ms: i64,
    pub rows_returned: Option<i64>,
    pub rows_examined: Option<i64>,
    pub executed_at: DateTime<Utc>,
    pub failed: bool,
}

/// Fire-and-forget recorder handed to stores.
///
/// `record` filters below-threshold successes and enqueues the rest; it never
/// awaits and never blocks.
#[derive(Clone)]
pub struct QueryPerformanceRecorder {
    tx: mpsc::Sender<QuerySample>,
    threshold_ms: i64,
}

impl QueryPerformanceRecorder {
    /// Create the recorder and its draining receiver.
    pub fn channel(threshold_ms: i64, capacity: usize) -> (Self, mpsc::Receiver<QuerySample>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, threshold_ms }, rx)
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Record a sample. Successes under the threshold are ignored; a full
    /// queue drops the sample with a warning.
    pub fn record(&self, sample: QuerySample) {
        if !sample.failed && sample.execution_time_ms < self.threshold_ms {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(sample)) = self.tx.try_send(sample) {
            warn!(
                query_type = %sample.query_type,
                "metrics queue full, dropping query sample"
            );
        }
    }

    /// Convenience wrapper for timing a completed operation.
    pub fn observe(&self, query_type: &str, elapsed: Duration, rows_returned: i64, failed: bool) {
        self.record(QuerySample {
            query_type: query_type.to_string(),
            execution_time_ms: elapsed.as_millis() as i64,
            rows_returned: Some(rows_returned),
            rows_examined: None,
            executed_at: Utc::now(),
            failed,
        });
    }
}

/// Background writer draining samples into `query_performance_metrics` and
/// snapshotting pool gauges into `connection_pool_metrics`.
pub struct MetricsWriter {
    pool: PgPool,
    rx: mpsc::Receiver<QuerySample>,
    threshold_ms: i64,
    snapshot_interval: Duration,
}

impl MetricsWriter {
    pub fn new(pool: PgPool, rx: mpsc::Receiver<QuerySample>, threshold_ms: i64) -> Self {
        Self {
            pool,
            rx,
            threshold_ms,
            snapshot_interval: Duration::from_secs(60),
        }
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    async fn write_batch(&self, batch: &[QuerySample]) {
        if batch.is_empty() {
            return;
        }
        let query_types: Vec<String> = batch.iter().map(|s| s.query_type.clone()).collect();
        let times: Vec<i64> = batch.iter().map(|s| s.execution_time_ms).collect();
        let returned: Vec<Option<i64>> = batch.iter().map(|s| s.rows_returned).collect();
        let examined: Vec<Option<i64>> = batch.iter().map(|s| s.rows_examined).collect();
        let executed: Vec<DateTime<Utc>> = batch.iter().map(|s| s.executed_at).collect();
        let needs_optimization: Vec<bool> = batch
            .iter()
            .map(|s| s.failed || s.execution_time_ms >= self.threshold_ms)
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO query_performance_metrics (
                query_type, execution_time_ms, rows_returned, rows_examined,
                executed_at, needs_optimization
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::bigint[], $3::bigint[], $4::bigint[],
                $5::timestamptz[], $6::boolean[]
            )
            "#,
        )
        .bind(&query_types)
        .bind(&times)
        .bind(&returned)
        .bind(&examined)
        .bind(&executed)
        .bind(&needs_optimization)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => debug!(count = batch.len(), "query samples written"),
            Err(e) => warn!(error = %e, "failed to write query samples"),
        }
    }

    async fn snapshot_pool(&self) {
        let size = self.pool.size() as i32;
        let idle = self.pool.num_idle() as i32;
        let result = sqlx::query(
            r#"
            INSERT INTO connection_pool_metrics (pool_size, idle_connections, in_use, recorded_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(size)
        .bind(idle)
        .bind(size - idle)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to write pool snapshot");
        }
    }
}

#[async_trait::async_trait]
impl Service for MetricsWriter {
    fn name(&self) -> &'static str {
        "metrics-writer"
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.snapshot_interval);
        interval.tick().await; // skip the immediate tick
        let mut batch: Vec<QuerySample> = Vec::with_capacity(64);

        loop {
            batch.clear();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.snapshot_pool().await;
                }
                received = self.rx.recv_many(&mut batch, 64) => {
                    if received == 0 {
                        // All senders dropped.
                        break;
                    }
                    let pending = std::mem::take(&mut batch);
                    self.write_batch(&pending).await;
                }
            }
        }

        // Drain whatever is still queued so shutdown never loses samples.
        self.rx.close();
        let mut remaining: Vec<QuerySample> = Vec::new();
        while self.rx.recv_many(&mut remaining, 64).await > 0 {
            let pending = std::mem::take(&mut remaining);
            self.write_batch(&pending).await;
        }

        Ok(())
    }
}
