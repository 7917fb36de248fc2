//! At-most-once job claiming under concurrent workers.

mod common;

use std::collections::HashSet;

use common::*;
use server_core::common::StoreError;
use server_core::kernel::jobs::{EnqueueOptions, JobQueue, JobStatus};
use uuid::Uuid;

/// Unique job type per test so concurrent tests on the shared database
/// never claim each other's work.
fn unique_job_type(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[tokio::test]
async fn twenty_jobs_thirty_workers_claim_each_exactly_once() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-s1").await;
    let job_type = unique_job_type("domain_generation");

    for _ in 0..20 {
        h.queue
            .enqueue(
                EnqueueOptions::builder()
                    .campaign_id(campaign.id)
                    .job_type(job_type.clone())
                    .build(),
            )
            .await
            .unwrap();
    }

    // 30 workers race for 20 jobs, one claim each.
    let mut handles = Vec::new();
    for worker in 0..30 {
        let queue = h.queue.clone();
        let job_type = job_type.clone();
        handles.push(tokio::spawn(async move {
            queue
                .claim(&format!("worker-{worker}"), &[job_type])
                .await
        }));
    }

    let mut claimed = Vec::new();
    let mut not_found = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(job) => claimed.push(job),
            Err(StoreError::NotFound(_)) => not_found += 1,
            Err(other) => panic!("unexpected claim error: {other}"),
        }
    }

    assert_eq!(claimed.len(), 20);
    assert_eq!(not_found, 10);

    let ids: HashSet<Uuid> = claimed.iter().map(|j| j.id).collect();
    assert_eq!(ids.len(), 20, "every job claimed exactly once");

    let workers: HashSet<&str> = claimed
        .iter()
        .map(|j| j.processing_server_id.as_deref().expect("owner set"))
        .collect();
    assert_eq!(workers.len(), 20, "each job owned by a distinct worker");

    for job in &claimed {
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.locked_by, job.processing_server_id);
        assert!(job.locked_at.is_some());
    }
}

#[tokio::test]
async fn stress_fifty_workers_hundred_jobs_no_duplicates() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-stress").await;
    let job_type = unique_job_type("dns_validation");

    for _ in 0..100 {
        h.queue
            .enqueue(
                EnqueueOptions::builder()
                    .campaign_id(campaign.id)
                    .job_type(job_type.clone())
                    .build(),
            )
            .await
            .unwrap();
    }

    // 50 workers loop until the queue reports nothing claimable.
    let mut handles = Vec::new();
    for worker in 0..50 {
        let queue = h.queue.clone();
        let job_type = job_type.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("stress-worker-{worker}");
            let mut mine = Vec::new();
            loop {
                match queue.claim(&worker_id, &[job_type.clone()]).await {
                    Ok(job) => mine.push(job.id),
                    Err(StoreError::NotFound(_)) => break,
                    Err(other) => panic!("unexpected claim error: {other}"),
                }
            }
            mine
        }));
    }

    let mut all: Vec<Uuid> = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 100, "union of claims covers every job");
    assert_eq!(unique.len(), 100, "no job claimed twice");
}

#[tokio::test]
async fn failed_job_is_reclaimable_only_after_backoff() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-retry").await;
    let job_type = unique_job_type("http_validation");

    let job = h
        .queue
        .enqueue(
            EnqueueOptions::builder()
                .campaign_id(campaign.id)
                .job_type(job_type.clone())
                .build(),
        )
        .await
        .unwrap();

    let claimed = h.queue.claim("w1", &[job_type.clone()]).await.unwrap();
    assert_eq!(claimed.id, job.id);

    let failed = h.queue.report_failure(job.id, "probe refused").await.unwrap();
    assert_eq!(failed.attempts, 1);
    assert!(failed.next_execution_at.is_some());
    assert_eq!(failed.last_error.as_deref(), Some("probe refused"));

    // Backoff has not elapsed: nothing claimable.
    let err = h.queue.claim("w2", &[job_type.clone()]).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn exhausted_attempts_fail_permanently() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-exhaust").await;
    let job_type = unique_job_type("analysis");

    let job = h
        .queue
        .enqueue(
            EnqueueOptions::builder()
                .campaign_id(campaign.id)
                .job_type(job_type.clone())
                .max_attempts(1)
                .build(),
        )
        .await
        .unwrap();

    h.queue.claim("w1", &[job_type.clone()]).await.unwrap();
    let failed = h.queue.report_failure(job.id, "boom").await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);

    // Terminal: never claimed again.
    let err = h.queue.claim("w2", &[job_type]).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn completed_job_is_never_reclaimed() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-complete").await;
    let job_type = unique_job_type("domain_generation");

    let job = h
        .queue
        .enqueue(
            EnqueueOptions::builder()
                .campaign_id(campaign.id)
                .job_type(job_type.clone())
                .build(),
        )
        .await
        .unwrap();

    h.queue.claim("w1", &[job_type.clone()]).await.unwrap();
    h.queue.report_success(job.id).await.unwrap();

    let err = h.queue.claim("w1", &[job_type]).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn scheduled_jobs_wait_for_their_time() {
    let h = TestHarness::new().await;
    let campaign = create_fresh_campaign(&h.pool, "claim-scheduled").await;
    let job_type = unique_job_type("dns_validation");

    h.queue
        .enqueue(
            EnqueueOptions::builder()
                .campaign_id(campaign.id)
                .job_type(job_type.clone())
                .scheduled_at(chrono::Utc::now() + chrono::Duration::hours(1))
                .build(),
        )
        .await
        .unwrap();

    let err = h.queue.claim("w1", &[job_type]).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
