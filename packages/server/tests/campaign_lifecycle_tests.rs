//! Campaign progress, phase writeback, and cascading deletion.

mod common;

use common::*;
use serde_json::json;
use server_core::common::StoreError;
use server_core::domains::campaigns::{
    Campaign, CampaignMachine, CampaignPhase, PhaseBatch, PhaseStatus,
};
use server_core::domains::leads::model::GeneratedDomain;
use server_core::domains::leads::{DomainStatusUpdate, ProbeOutcome};
use server_core::kernel::jobs::{CampaignJob, JobStatus};

#[tokio::test]
async fn progress_is_monotone_and_clamped() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "progress",
        CampaignPhase::DomainGeneration,
        PhaseStatus::InProgress,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let after = machine.update_progress(campaign.id, 10, 100).await.unwrap();
    assert_eq!(after.processed_items, 10);
    assert!((after.progress_percentage - 10.0).abs() < f64::EPSILON);

    // A stale, lower report never decreases the counter.
    let after = machine.update_progress(campaign.id, 5, 100).await.unwrap();
    assert_eq!(after.processed_items, 10);

    let after = machine.update_progress(campaign.id, 100, 100).await.unwrap();
    assert_eq!(after.processed_items, 100);
    assert!((after.progress_percentage - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn progress_lifts_status_to_in_progress() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "progress-lift",
        CampaignPhase::DomainGeneration,
        PhaseStatus::NotStarted,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let after = machine.update_progress(campaign.id, 1, 10).await.unwrap();
    assert_eq!(after.phase_status, PhaseStatus::InProgress);
}

#[tokio::test]
async fn terminal_phase_admits_no_progress_writes() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "progress-terminal",
        CampaignPhase::Analysis,
        PhaseStatus::Completed,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let after = machine.update_progress(campaign.id, 50, 100).await.unwrap();
    assert_eq!(after.processed_items, 0);
    assert_eq!(after.phase_status, PhaseStatus::Completed);
}

#[tokio::test]
async fn out_of_range_progress_is_rejected_before_any_write() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "progress-range",
        CampaignPhase::DomainGeneration,
        PhaseStatus::InProgress,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let err = machine.update_progress(campaign.id, 11, 10).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));

    let err = machine.update_progress(campaign.id, -1, 10).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));
}

#[tokio::test]
async fn completing_a_validation_phase_writes_back_and_advances() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "writeback",
        CampaignPhase::DnsValidation,
        PhaseStatus::InProgress,
    )
    .await;
    seed_domains(&h.pool, campaign.id, 2).await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let batch = PhaseBatch {
        processed_items: 2,
        total_items: 2,
        status_updates: vec![
            DomainStatusUpdate {
                domain_name: "d0.example.com".to_string(),
                outcome: ProbeOutcome::Ok,
                http_status_code: None,
                page_title: None,
                last_checked_at: chrono::Utc::now(),
            },
            DomainStatusUpdate {
                domain_name: "d1.example.com".to_string(),
                outcome: ProbeOutcome::Error,
                http_status_code: None,
                page_title: None,
                last_checked_at: chrono::Utc::now(),
            },
        ],
        aggregate: Some(json!({"resolved": 1, "errored": 1})),
        ..PhaseBatch::default()
    };

    let after = machine
        .complete_phase(campaign.id, CampaignPhase::DnsValidation, batch)
        .await
        .unwrap();

    // The pipeline advanced with fresh counters for the new phase run.
    assert_eq!(after.current_phase, CampaignPhase::HttpValidation);
    assert_eq!(after.phase_status, PhaseStatus::InProgress);
    assert_eq!(after.processed_items, 0);

    let stored = Campaign::find_by_id(campaign.id, &h.pool).await.unwrap();
    assert_eq!(stored.dns_results, Some(json!({"resolved": 1, "errored": 1})));

    // The next phase's job was enqueued post-commit.
    let jobs = CampaignJob::find_by_campaign(campaign.id, &h.pool)
        .await
        .unwrap();
    assert!(jobs
        .iter()
        .any(|j| j.job_type == "http_validation" && j.status == JobStatus::Queued));

    let d1 = GeneratedDomain::find_by_name(campaign.id, "d1.example.com", &h.pool)
        .await
        .unwrap();
    assert_eq!(
        d1.rejection_reason,
        Some(server_core::domains::leads::RejectionReason::DnsError)
    );
}

#[tokio::test]
async fn completing_the_analysis_phase_completes_the_campaign() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "final-phase",
        CampaignPhase::Analysis,
        PhaseStatus::InProgress,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let after = machine
        .complete_phase(
            campaign.id,
            CampaignPhase::Analysis,
            PhaseBatch {
                aggregate: Some(json!({"qualified": 12})),
                ..PhaseBatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(after.current_phase, CampaignPhase::Analysis);
    assert_eq!(after.phase_status, PhaseStatus::Completed);
    assert!(after.completed_at.is_some());

    // No further job was enqueued.
    assert!(CampaignJob::find_by_campaign(campaign.id, &h.pool)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn completing_the_wrong_phase_is_a_state_mismatch() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "wrong-phase",
        CampaignPhase::DnsValidation,
        PhaseStatus::InProgress,
    )
    .await;
    let machine = CampaignMachine::new(h.kernel.clone());

    let err = machine
        .complete_phase(campaign.id, CampaignPhase::Analysis, PhaseBatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StateMismatch { .. }));
}

#[tokio::test]
async fn listing_filters_and_falls_back_on_bad_sort_keys() {
    let h = TestHarness::new().await;
    let user_id = uuid::Uuid::new_v4();
    for (name, status) in [
        ("list-a", PhaseStatus::InProgress),
        ("list-b", PhaseStatus::Paused),
        ("list-c", PhaseStatus::InProgress),
    ] {
        server_core::domains::campaigns::Campaign::builder()
            .name(name.to_string())
            .user_id(user_id)
            .current_phase(CampaignPhase::DomainGeneration)
            .phase_status(status)
            .build()
            .insert(&h.pool)
            .await
            .unwrap();
    }

    let filter = server_core::domains::campaigns::CampaignFilter::builder()
        .user_id(user_id)
        .phase_status(PhaseStatus::InProgress)
        .sort_key("name".to_string())
        .sort_direction(server_core::common::SortDirection::Asc)
        .build();
    let campaigns = server_core::domains::campaigns::store::list(&filter, &h.pool)
        .await
        .unwrap();
    let names: Vec<&str> = campaigns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["list-a", "list-c"]);

    // A hostile sort key falls back to created_at DESC instead of erroring.
    let filter = server_core::domains::campaigns::CampaignFilter::builder()
        .user_id(user_id)
        .sort_key("name; DROP TABLE campaigns".to_string())
        .build();
    let campaigns = server_core::domains::campaigns::store::list(&filter, &h.pool)
        .await
        .unwrap();
    assert_eq!(campaigns.len(), 3);
}

#[tokio::test]
async fn delete_cascades_children_in_one_transaction() {
    let h = TestHarness::new().await;
    let campaign = create_campaign(
        &h.pool,
        "s6",
        CampaignPhase::DnsValidation,
        PhaseStatus::InProgress,
    )
    .await;
    seed_domains(&h.pool, campaign.id, 1000).await;
    for _ in 0..3 {
        CampaignJob::immediate(campaign.id, "dns_validation")
            .insert(&h.pool)
            .await
            .unwrap();
    }
    let machine = CampaignMachine::new(h.kernel.clone());

    machine.delete_campaign(campaign.id).await.unwrap();

    let domains: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM generated_domains WHERE campaign_id = $1")
            .bind(campaign.id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(domains, 0);
    assert!(CampaignJob::find_by_campaign(campaign.id, &h.pool)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        Campaign::find_by_id(campaign.id, &h.pool).await.unwrap_err(),
        StoreError::NotFound(_)
    ));

    // Second delete: the campaign is gone.
    let err = machine.delete_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
