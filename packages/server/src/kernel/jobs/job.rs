//! Campaign job model and the at-most-once claim.
//!
//! A job is claimable iff it is freshly queued, or scheduled for retry with
//! its backoff elapsed, or running with a stale lock (crash recovery). A job
//! awaiting retry keeps `status = 'running'` with its lock cleared;
//! `business_status` distinguishes it. Once `completed` or `failed` a job is
//! never claimed again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "business_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    #[default]
    Pending,
    Retry,
    Terminal,
}

// ============================================================================
// Retry policy
// ============================================================================

/// Per-job-type linear backoff: `base x attempts`, capped at one hour.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: chrono::Duration,
}

impl RetryPolicy {
    pub const MAX_DELAY_SECS: i64 = 3600;

    pub fn new(base: chrono::Duration) -> Self {
        Self { base }
    }

    /// Backoff base for a job type. DNS and HTTP probes back off faster than
    /// the heavier generation and analysis phases.
    pub fn for_job_type(job_type: &str) -> Self {
        let base_secs = match job_type {
            "dns_validation" | "http_validation" => 30,
            "domain_generation" | "analysis" => 120,
            _ => 60,
        };
        Self::new(chrono::Duration::seconds(base_secs))
    }

    /// Delay before the next execution after `attempts` tries.
    pub fn delay_for(&self, attempts: i32) -> chrono::Duration {
        let scaled = self.base * attempts.max(1);
        std::cmp::min(scaled, chrono::Duration::seconds(Self::MAX_DELAY_SECS))
    }
}

// ============================================================================
// CampaignJob model
// ============================================================================

const JOB_COLUMNS: &str = r#"id, campaign_id, job_type, status, business_status,
       attempts, max_attempts, scheduled_at, next_execution_at,
       processing_server_id, locked_at, locked_by, job_payload, last_error,
       created_at, updated_at"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CampaignJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub campaign_id: Uuid,
    pub job_type: String,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default)]
    pub business_status: BusinessStatus,

    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,

    #[builder(default, setter(strip_option))]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub next_execution_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub processing_server_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub locked_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,

    #[builder(default, setter(strip_option))]
    pub job_payload: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl CampaignJob {
    /// Create an immediately claimable job (convenience constructor).
    pub fn immediate(campaign_id: Uuid, job_type: &str) -> Self {
        Self::builder()
            .campaign_id(campaign_id)
            .job_type(job_type.to_string())
            .build()
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM campaign_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.find_by_id", e))?
        .ok_or_else(|| StoreError::not_found("campaign job", id))
    }

    pub async fn find_by_campaign<'e, E: PgExecutor<'e>>(
        campaign_id: Uuid,
        db: E,
    ) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM campaign_jobs WHERE campaign_id = $1 ORDER BY created_at ASC"
        ))
        .bind(campaign_id)
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.find_by_campaign", e))
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO campaign_jobs (
                id, campaign_id, job_type, status, business_status,
                attempts, max_attempts, scheduled_at, next_execution_at,
                processing_server_id, locked_at, locked_by, job_payload, last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.campaign_id)
        .bind(&self.job_type)
        .bind(self.status)
        .bind(self.business_status)
        .bind(self.attempts)
        .bind(self.max_attempts)
        .bind(self.scheduled_at)
        .bind(self.next_execution_at)
        .bind(&self.processing_server_id)
        .bind(self.locked_at)
        .bind(&self.locked_by)
        .bind(&self.job_payload)
        .bind(&self.last_error)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.insert", e))
    }

    /// Claim the next ready job atomically using `FOR UPDATE SKIP LOCKED`.
    ///
    /// Candidate ordering: `scheduled_at` ascending with NULLs first, then
    /// `created_at` ascending. The claim transitions the row to `running`,
    /// stamps the worker's ownership, and increments `attempts` in the same
    /// statement. Also recovers running jobs whose lock is older than
    /// `lease_ms` (the worker died mid-execution).
    ///
    /// Returns `NotFound` when no candidate is ready.
    pub async fn claim_next<'e, E: PgExecutor<'e>>(
        worker_id: &str,
        job_types: &[String],
        lease_ms: i64,
        db: E,
    ) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM campaign_jobs
                WHERE (
                        status = 'queued'
                        OR (business_status = 'retry'
                            AND status NOT IN ('completed', 'failed')
                            AND next_execution_at <= NOW())
                        OR (status = 'running'
                            AND locked_at IS NOT NULL
                            AND locked_at < NOW() - ($3 || ' milliseconds')::INTERVAL)
                      )
                  AND (scheduled_at IS NULL OR scheduled_at <= NOW())
                  AND (cardinality($2::text[]) = 0 OR job_type = ANY($2::text[]))
                  AND attempts < max_attempts
                ORDER BY scheduled_at ASC NULLS FIRST, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE campaign_jobs
            SET status = 'running',
                business_status = 'pending',
                processing_server_id = $1,
                locked_by = $1,
                locked_at = NOW(),
                scheduled_at = COALESCE(scheduled_at, NOW()),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM candidate)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(job_types)
        .bind(lease_ms.to_string())
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.claim_next", e))?
        .ok_or_else(|| StoreError::NotFound("no claimable job".to_string()))
    }

    /// Mark a job completed. Terminal; clears the lock.
    pub async fn mark_completed<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET status = 'completed',
                business_status = 'terminal',
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.mark_completed", e))
        .map(|_| ())
    }

    /// Report a failed execution.
    ///
    /// With attempts remaining the job is rescheduled: `business_status`
    /// becomes `retry` and `next_execution_at` is pushed out by the linear
    /// per-job-type backoff, scaled by the attempts already burned.
    /// Exhausted jobs transition to `failed` permanently.
    pub async fn mark_failed<'e, E: PgExecutor<'e>>(
        id: Uuid,
        error: &str,
        policy: RetryPolicy,
        db: E,
    ) -> Result<Self, StoreError> {
        let base_secs = policy.delay_for(1).num_seconds();
        sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE campaign_jobs
            SET business_status = CASE
                    WHEN attempts < max_attempts THEN 'retry'::business_status
                    ELSE 'terminal'::business_status
                END,
                status = CASE
                    WHEN attempts < max_attempts THEN status
                    ELSE 'failed'::job_status
                END,
                next_execution_at = CASE
                    WHEN attempts < max_attempts
                    THEN NOW() + ((LEAST($2::bigint * GREATEST(attempts, 1), {max_delay}))::text
                                  || ' seconds')::INTERVAL
                    ELSE next_execution_at
                END,
                locked_at = NULL,
                locked_by = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#,
            max_delay = RetryPolicy::MAX_DELAY_SECS,
        ))
        .bind(id)
        .bind(base_secs)
        .bind(error)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.mark_failed", e))?
        .ok_or_else(|| StoreError::not_found("campaign job", id))
    }

    /// Cancel every outstanding (queued) job for a campaign.
    ///
    /// Used by the control plane's `stop`: queued jobs transition straight
    /// to `failed` with a terminal `cancelled` reason. Running jobs finish
    /// under cooperative cancellation and report normally.
    pub async fn cancel_for_campaign<'e, E: PgExecutor<'e>>(
        campaign_id: Uuid,
        db: E,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET status = 'failed',
                business_status = 'terminal',
                last_error = 'cancelled',
                updated_at = NOW()
            WHERE campaign_id = $1 AND status = 'queued'
            "#,
        )
        .bind(campaign_id)
        .execute(db)
        .await
        .map_err(|e| translate_err("campaign_jobs.cancel_for_campaign", e))?;

        Ok(result.rows_affected())
    }
}
