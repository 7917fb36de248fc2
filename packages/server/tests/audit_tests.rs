//! Audit-log validation and completeness.

mod common;

use chrono::{Duration, Utc};
use common::*;
use serde_json::json;
use server_core::common::StoreError;
use server_core::domains::audit::store as audit_store;
use server_core::domains::audit::{Actor, NewAuditEntry};
use uuid::Uuid;

#[tokio::test]
async fn valid_entry_is_persisted() {
    let h = TestHarness::new().await;
    let user_id = Uuid::new_v4();

    let entry = NewAuditEntry::builder()
        .user_id(user_id)
        .action("campaign_progress")
        .build()
        .with_details(json!({"processed": 10}));
    let written = audit_store::insert(&entry, &h.pool).await.unwrap();

    assert_eq!(written.user_id, user_id);
    assert_eq!(written.action, "campaign_progress");
    assert_eq!(written.details, Some(json!({"processed": 10})));
}

#[tokio::test]
async fn nil_user_id_fails_before_persistence() {
    let h = TestHarness::new().await;
    let entry = NewAuditEntry::builder()
        .user_id(Uuid::nil())
        .action("campaign_progress")
        .build();

    let err = audit_store::insert(&entry, &h.pool).await.unwrap_err();
    assert!(matches!(err, StoreError::AuditViolation(_)));

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE user_id = $1")
            .bind(Uuid::nil())
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(count, 0, "nothing reached the database");
}

#[tokio::test]
async fn security_critical_action_requires_client_identity() {
    let h = TestHarness::new().await;

    let bare = NewAuditEntry::for_actor(&Actor::new(Uuid::new_v4()), "campaign_delete");
    let err = audit_store::insert(&bare, &h.pool).await.unwrap_err();
    assert!(matches!(err, StoreError::AuditViolation(_)));

    let full = NewAuditEntry::for_actor(&test_actor(), "campaign_delete")
        .entity("campaign", Uuid::new_v4());
    audit_store::insert(&full, &h.pool).await.unwrap();
}

#[tokio::test]
async fn entity_type_without_entity_id_is_rejected() {
    let h = TestHarness::new().await;
    let mut entry = NewAuditEntry::builder()
        .user_id(Uuid::new_v4())
        .action("campaign_progress")
        .build();
    entry.entity_type = Some("campaign".to_string());

    let err = audit_store::insert(&entry, &h.pool).await.unwrap_err();
    assert!(matches!(err, StoreError::AuditViolation(_)));
}

#[tokio::test]
async fn completeness_audit_scans_without_mutating() {
    let h = TestHarness::new().await;
    let window_start = Utc::now() - Duration::minutes(5);

    // Valid writes through the store leave nothing for the audit to find.
    for _ in 0..3 {
        let entry = NewAuditEntry::builder()
            .user_id(Uuid::new_v4())
            .action("campaign_progress")
            .build();
        audit_store::insert(&entry, &h.pool).await.unwrap();
    }

    let window_end = Utc::now() + Duration::minutes(5);
    let missing = audit_store::completeness_audit(window_start, window_end, &h.pool)
        .await
        .unwrap();
    assert!(missing.is_empty());

    // Running it twice returns the same answer: it never mutates.
    let again = audit_store::completeness_audit(window_start, window_end, &h.pool)
        .await
        .unwrap();
    assert_eq!(again.len(), missing.len());
}

#[tokio::test]
async fn security_events_link_to_their_audit_entry() {
    let h = TestHarness::new().await;

    let entry = NewAuditEntry::for_actor(&test_actor(), "campaign_access_denied")
        .entity("campaign", Uuid::new_v4());
    let written = audit_store::insert(&entry, &h.pool).await.unwrap();

    let event = audit_store::record_security_event(
        written.id,
        "authorization_denied",
        Some(&json!({"role": "viewer"})),
        &h.pool,
    )
    .await
    .unwrap();
    assert_eq!(event.audit_log_id, written.id);

    let decision = audit_store::record_authorization_decision(
        written.id,
        "campaign",
        "stop",
        false,
        Some("viewer role lacks control permissions"),
        &h.pool,
    )
    .await
    .unwrap();
    assert_eq!(decision.audit_log_id, written.id);
    assert!(!decision.allowed);
}

#[tokio::test]
async fn security_event_for_unknown_audit_entry_is_rejected() {
    let h = TestHarness::new().await;

    let err = audit_store::record_security_event(Uuid::new_v4(), "orphan", None, &h.pool)
        .await
        .unwrap_err();
    // FK violation surfaces as a validation error, not a duplicate.
    assert!(matches!(err, StoreError::Validation { .. }));
}
