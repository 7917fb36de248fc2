//! Job worker service.
//!
//! A long-running service that polls the queue for ready jobs, dispatches
//! them through the [`JobRegistry`], and reports the outcome back. Each
//! worker owns a distinct `worker_id`; the claim statement guarantees two
//! workers never receive the same job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::JobQueue;
use super::registry::SharedJobRegistry;
use crate::common::StoreError;
use crate::kernel::service::Service;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Worker ID for this instance; recorded as `processing_server_id`.
    pub worker_id: String,
    /// How long to sleep when no jobs are available.
    pub poll_interval: Duration,
    /// Job types this worker handles; empty means all.
    pub job_types: Vec<String>,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(2),
            job_types: Vec::new(),
        }
    }
}

impl JobWorkerConfig {
    /// Create a config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A worker that claims and executes campaign jobs.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, registry: SharedJobRegistry) -> Self {
        Self {
            queue,
            registry,
            config: JobWorkerConfig::default(),
        }
    }

    pub fn with_config(
        queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    /// Claim and execute one job. Returns false when nothing was claimable.
    async fn tick(&self) -> bool {
        let job = match self
            .queue
            .claim(&self.config.worker_id, &self.config.job_types)
            .await
        {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => return false,
            Err(e) => {
                error!(worker_id = %self.config.worker_id, error = %e, "job claim failed");
                return false;
            }
        };

        let job_id = job.id;
        let job_type = job.job_type.clone();
        debug!(job_id = %job_id, job_type = %job_type, "job claimed");

        match self.registry.execute(job).await {
            Ok(()) => {
                debug!(job_id = %job_id, job_type = %job_type, "job succeeded");
                if let Err(e) = self.queue.report_success(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job as completed");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, job_type = %job_type, error = %e, "job failed");
                if let Err(e) = self.queue.report_failure(job_id, &e.to_string()).await {
                    error!(job_id = %job_id, error = %e, "failed to record job failure");
                }
            }
        }
        true
    }
}

#[async_trait::async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        "job-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            job_types = ?self.config.job_types,
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Keep draining while work is available; sleep only when idle.
            if self.tick().await {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = JobWorkerConfig::default();
        assert!(config.worker_id.starts_with("worker-"));
        assert!(config.job_types.is_empty());
    }

    #[test]
    fn config_with_worker_id() {
        let config = JobWorkerConfig::with_worker_id("worker-7");
        assert_eq!(config.worker_id, "worker-7");
    }
}
