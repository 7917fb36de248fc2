//! Audit-log persistence.
//!
//! This is the validating store: every write passes identity validation
//! first and a violation aborts before anything reaches the database.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::model::{AuditLog, AuthorizationDecision, NewAuditEntry, SecurityEvent};
use crate::common::{translate_err, StoreError};

const AUDIT_COLUMNS: &str =
    "id, timestamp, user_id, action, entity_type, entity_id, details, client_ip, user_agent";

/// Write an audit entry after validating its user identity.
pub async fn insert<'e, E: PgExecutor<'e>>(
    entry: &NewAuditEntry,
    db: E,
) -> Result<AuditLog, StoreError> {
    entry.validate()?;

    sqlx::query_as::<_, AuditLog>(&format!(
        r#"
        INSERT INTO audit_logs (
            id, timestamp, user_id, action, entity_type, entity_id,
            details, client_ip, user_agent
        )
        VALUES (gen_random_uuid(), NOW(), $1, $2, $3, $4, $5, $6, $7)
        RETURNING {AUDIT_COLUMNS}
        "#
    ))
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(&entry.details)
    .bind(&entry.client_ip)
    .bind(&entry.user_agent)
    .fetch_one(db)
    .await
    .map_err(|e| translate_err("audit_logs.insert", e))
}

/// Completeness audit: every entry in the window with a missing user
/// identity. Read-only; never mutates data.
///
/// The write path rejects nil identities, so hits here are legacy rows or
/// writes that bypassed the validating store.
pub async fn completeness_audit<'e, E: PgExecutor<'e>>(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    db: E,
) -> Result<Vec<AuditLog>, StoreError> {
    sqlx::query_as::<_, AuditLog>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        WHERE timestamp >= $1 AND timestamp < $2
          AND user_id = '00000000-0000-0000-0000-000000000000'::uuid
        ORDER BY timestamp ASC
        "#
    ))
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await
    .map_err(|e| translate_err("audit_logs.completeness_audit", e))
}

/// Audit entries for one entity, newest first.
pub async fn for_entity<'e, E: PgExecutor<'e>>(
    entity_type: &str,
    entity_id: Uuid,
    limit: i64,
    db: E,
) -> Result<Vec<AuditLog>, StoreError> {
    sqlx::query_as::<_, AuditLog>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        WHERE entity_type = $1 AND entity_id = $2
        ORDER BY timestamp DESC
        LIMIT $3
        "#
    ))
    .bind(entity_type)
    .bind(entity_id)
    .bind(limit)
    .fetch_all(db)
    .await
    .map_err(|e| translate_err("audit_logs.for_entity", e))
}

/// Record a security event tied to an audit entry.
pub async fn record_security_event<'e, E: PgExecutor<'e>>(
    audit_log_id: Uuid,
    event_type: &str,
    details: Option<&serde_json::Value>,
    db: E,
) -> Result<SecurityEvent, StoreError> {
    sqlx::query_as::<_, SecurityEvent>(
        r#"
        INSERT INTO security_events (id, audit_log_id, event_type, details, created_at)
        VALUES (gen_random_uuid(), $1, $2, $3, NOW())
        RETURNING id, audit_log_id, event_type, details, created_at
        "#,
    )
    .bind(audit_log_id)
    .bind(event_type)
    .bind(details)
    .fetch_one(db)
    .await
    .map_err(|e| translate_err("security_events.insert", e))
}

/// Record an authorization decision tied to an audit entry.
pub async fn record_authorization_decision<'e, E: PgExecutor<'e>>(
    audit_log_id: Uuid,
    resource: &str,
    action: &str,
    allowed: bool,
    reason: Option<&str>,
    db: E,
) -> Result<AuthorizationDecision, StoreError> {
    sqlx::query_as::<_, AuthorizationDecision>(
        r#"
        INSERT INTO authorization_decisions (
            id, audit_log_id, resource, action, allowed, reason, decided_at
        )
        VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NOW())
        RETURNING id, audit_log_id, resource, action, allowed, reason, decided_at
        "#,
    )
    .bind(audit_log_id)
    .bind(resource)
    .bind(action)
    .bind(allowed)
    .bind(reason)
    .fetch_one(db)
    .await
    .map_err(|e| translate_err("authorization_decisions.insert", e))
}
