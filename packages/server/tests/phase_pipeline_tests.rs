//! End-to-end: a worker claims a phase job, runs its executor, and the
//! state machine writes the batch back and advances the pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use serde_json::json;
use server_core::common::StoreError;
use server_core::domains::campaigns::{
    runtime::register_phase_handlers, Campaign, CampaignMachine, CampaignPhase, ExecutorRegistry,
    PhaseBatch, PhaseContext, PhaseExecutor, PhaseProgress, PhaseStatus, ValidationOutcome,
};
use server_core::domains::leads::{DomainStatusUpdate, ProbeOutcome};
use server_core::kernel::jobs::{
    CampaignJob, JobRegistry, JobStatus, JobWorker, JobWorkerConfig,
};
use server_core::kernel::{spawn_service, Service};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Stub DNS executor: resolves every seeded domain, reports progress.
struct StubDnsExecutor;

#[async_trait]
impl PhaseExecutor for StubDnsExecutor {
    fn phase(&self) -> CampaignPhase {
        CampaignPhase::DnsValidation
    }

    async fn validate_configuration(&self, _config: &serde_json::Value) -> ValidationOutcome {
        ValidationOutcome::ok()
    }

    async fn execute(
        &self,
        _ctx: &PhaseContext,
        progress: mpsc::Sender<PhaseProgress>,
    ) -> Result<PhaseBatch, StoreError> {
        let _ = progress
            .send(PhaseProgress {
                processed_items: 1,
                total_items: 2,
            })
            .await;

        Ok(PhaseBatch {
            processed_items: 2,
            total_items: 2,
            status_updates: vec![
                DomainStatusUpdate {
                    domain_name: "d0.example.com".to_string(),
                    outcome: ProbeOutcome::Ok,
                    http_status_code: None,
                    page_title: None,
                    last_checked_at: Utc::now(),
                },
                DomainStatusUpdate {
                    domain_name: "d1.example.com".to_string(),
                    outcome: ProbeOutcome::Timeout,
                    http_status_code: None,
                    page_title: None,
                    last_checked_at: Utc::now(),
                },
            ],
            aggregate: Some(json!({"resolved": 1, "timed_out": 1})),
            ..PhaseBatch::default()
        })
    }
}

#[tokio::test]
async fn worker_drives_a_dns_job_through_to_the_next_phase() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "pipeline",
        CampaignPhase::DnsValidation,
        PhaseStatus::InProgress,
    )
    .await;
    seed_domains(&h.pool, campaign.id, 2).await;

    // Wire the runtime the way the daemon does.
    let machine = Arc::new(CampaignMachine::new(h.kernel.clone()));
    let mut executors = ExecutorRegistry::new();
    executors.register(Arc::new(StubDnsExecutor));
    let executors = Arc::new(executors);
    let mut registry = JobRegistry::new();
    register_phase_handlers(&mut registry, executors, machine);
    let registry = Arc::new(registry);

    let job = CampaignJob::immediate(campaign.id, "dns_validation")
        .insert(&h.pool)
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let worker: Box<dyn Service> = Box::new(JobWorker::with_config(
        h.queue.clone(),
        registry,
        JobWorkerConfig {
            worker_id: "pipeline-worker".to_string(),
            poll_interval: Duration::from_millis(50),
            job_types: vec!["dns_validation".to_string()],
        },
    ));
    let handle = spawn_service(worker, shutdown.clone());

    // Wait for the job to complete.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let current = CampaignJob::find_by_id(job.id, &h.pool).await.unwrap();
        if current.status == JobStatus::Completed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never completed: {:?}",
            current.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    shutdown.cancel();
    let _ = handle.await;

    // The batch landed and the pipeline advanced.
    let after = Campaign::find_by_id(campaign.id, &h.pool).await.unwrap();
    assert_eq!(after.current_phase, CampaignPhase::HttpValidation);
    assert_eq!(after.phase_status, PhaseStatus::InProgress);
    assert_eq!(
        after.dns_results,
        Some(json!({"resolved": 1, "timed_out": 1}))
    );

    let d1 = server_core::domains::leads::model::GeneratedDomain::find_by_name(
        campaign.id,
        "d1.example.com",
        &h.pool,
    )
    .await
    .unwrap();
    assert_eq!(
        d1.rejection_reason,
        Some(server_core::domains::leads::RejectionReason::DnsTimeout)
    );

    // The follow-up HTTP job is queued.
    let jobs = CampaignJob::find_by_campaign(campaign.id, &h.pool)
        .await
        .unwrap();
    assert!(jobs
        .iter()
        .any(|j| j.job_type == "http_validation" && j.status == JobStatus::Queued));
}
