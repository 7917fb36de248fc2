//! PostgreSQL-backed job queue.
//!
//! Stores and retrieves phase work for background execution. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers always receive disjoint
//! jobs (see [`CampaignJob::claim_next`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::job::{BusinessStatus, CampaignJob, JobStatus, RetryPolicy};
use crate::common::StoreError;

/// Options for enqueuing a job.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct EnqueueOptions {
    /// Campaign this job belongs to.
    pub campaign_id: Uuid,
    /// Job type (mirrors the phase enum).
    pub job_type: String,
    /// Opaque payload handed to the phase executor.
    #[builder(default)]
    pub payload: Option<serde_json::Value>,
    /// Maximum execution attempts (default 3).
    #[builder(default = 3)]
    pub max_attempts: i32,
    /// When to run the job. If None, runs immediately.
    #[builder(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl EnqueueOptions {
    /// Options for a one-time immediate job.
    pub fn immediate(campaign_id: Uuid, job_type: impl Into<String>) -> Self {
        Self::builder()
            .campaign_id(campaign_id)
            .job_type(job_type)
            .build()
    }
}

/// Trait for job queue operations.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for execution.
    async fn enqueue(&self, options: EnqueueOptions) -> Result<CampaignJob, StoreError>;

    /// Claim the next ready job for this worker.
    ///
    /// `job_types` filters candidates when non-empty. Returns `NotFound`
    /// when nothing is claimable.
    async fn claim(&self, worker_id: &str, job_types: &[String])
        -> Result<CampaignJob, StoreError>;

    /// Mark a job as successfully completed.
    async fn report_success(&self, job_id: Uuid) -> Result<(), StoreError>;

    /// Mark a job execution as failed.
    ///
    /// If attempts remain the job is rescheduled with backoff; otherwise it
    /// transitions to `failed` permanently. Returns the updated row.
    async fn report_failure(&self, job_id: Uuid, error: &str) -> Result<CampaignJob, StoreError>;

    /// Cancel all queued jobs for a campaign. Returns the count cancelled.
    async fn cancel_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError>;
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    lease_ms: i64,
}

impl PostgresJobQueue {
    /// Create a new queue with the default one-minute lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_ms: 60_000,
        }
    }

    /// Create with a custom lease duration.
    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self { pool, lease_ms }
    }

    pub fn lease_ms(&self) -> i64 {
        self.lease_ms
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, options: EnqueueOptions) -> Result<CampaignJob, StoreError> {
        let job = CampaignJob {
            id: Uuid::new_v4(),
            campaign_id: options.campaign_id,
            job_type: options.job_type,
            status: JobStatus::Queued,
            business_status: BusinessStatus::Pending,
            attempts: 0,
            max_attempts: options.max_attempts,
            scheduled_at: options.scheduled_at,
            next_execution_at: None,
            processing_server_id: None,
            locked_at: None,
            locked_by: None,
            job_payload: options.payload,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let job = job.insert(&self.pool).await?;

        info!(
            job_id = %job.id,
            campaign_id = %job.campaign_id,
            job_type = %job.job_type,
            "job enqueued"
        );
        Ok(job)
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: &[String],
    ) -> Result<CampaignJob, StoreError> {
        CampaignJob::claim_next(worker_id, job_types, self.lease_ms, &self.pool).await
    }

    async fn report_success(&self, job_id: Uuid) -> Result<(), StoreError> {
        CampaignJob::mark_completed(job_id, &self.pool).await
    }

    async fn report_failure(&self, job_id: Uuid, error: &str) -> Result<CampaignJob, StoreError> {
        let job = CampaignJob::find_by_id(job_id, &self.pool).await?;
        let policy = RetryPolicy::for_job_type(&job.job_type);
        let updated = CampaignJob::mark_failed(job_id, error, policy, &self.pool).await?;

        if updated.status.is_terminal() {
            info!(job_id = %job_id, error, "job failed permanently");
        } else {
            info!(
                job_id = %job_id,
                attempts = updated.attempts,
                max_attempts = updated.max_attempts,
                next_execution_at = ?updated.next_execution_at,
                "job rescheduled for retry"
            );
        }
        Ok(updated)
    }

    async fn cancel_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError> {
        let cancelled = CampaignJob::cancel_for_campaign(campaign_id, &self.pool).await?;
        if cancelled > 0 {
            info!(campaign_id = %campaign_id, cancelled, "outstanding jobs cancelled");
        }
        Ok(cancelled)
    }
}
