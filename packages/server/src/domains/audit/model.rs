//! Audit-log and security-event models.
//!
//! Every audit entry must carry a valid user identity: a present,
//! non-nil `user_id` and a non-empty `action`. The enumerated
//! security-critical actions additionally require the client network
//! identity. Violations fail the write before anything is persisted; callers
//! must not silently drop the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::StoreError;

/// Actions that must carry `client_ip` and `user_agent`.
pub const SECURITY_CRITICAL_ACTIONS: &[&str] = &[
    "campaign_create",
    "campaign_update",
    "campaign_delete",
    "campaign_start",
    "campaign_stop",
    "campaign_pause",
    "campaign_access_granted",
    "campaign_access_denied",
    "user_login",
    "user_logout",
    "api_key_create",
    "api_key_delete",
    "permission_change",
    "role_assignment",
    "security_breach_detected",
    "unauthorized_access",
    "sensitive_data_access",
    "configuration_change",
];

/// Whether an action requires the client network identity.
pub fn is_security_critical(action: &str) -> bool {
    SECURITY_CRITICAL_ACTIONS.contains(&action)
}

/// Identity of the caller performing an audited action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_client(
        user_id: Uuid,
        client_ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            client_ip: Some(client_ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Input for a new audit entry, validated before persistence.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewAuditEntry {
    pub user_id: Uuid,
    pub action: String,
    #[builder(default)]
    pub entity_type: Option<String>,
    #[builder(default)]
    pub entity_id: Option<Uuid>,
    #[builder(default)]
    pub details: Option<serde_json::Value>,
    #[builder(default)]
    pub client_ip: Option<String>,
    #[builder(default)]
    pub user_agent: Option<String>,
}

impl NewAuditEntry {
    /// Build an entry for an actor performing an action on an entity.
    pub fn for_actor(actor: &Actor, action: impl Into<String>) -> Self {
        Self {
            user_id: actor.user_id,
            action: action.into(),
            entity_type: None,
            entity_id: None,
            details: None,
            client_ip: actor.client_ip.clone(),
            user_agent: actor.user_agent.clone(),
        }
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Identity validation. Returns `AuditViolation` on the first failure.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.user_id.is_nil() {
            return Err(StoreError::AuditViolation(
                "audit entry requires a non-nil user_id".to_string(),
            ));
        }
        if self.action.trim().is_empty() {
            return Err(StoreError::AuditViolation(
                "audit entry requires a non-empty action".to_string(),
            ));
        }
        if self.entity_type.is_some() {
            match self.entity_id {
                Some(id) if !id.is_nil() => {}
                _ => {
                    return Err(StoreError::AuditViolation(format!(
                        "audit entry for action {} names an entity_type without a valid entity_id",
                        self.action
                    )));
                }
            }
        }
        if is_security_critical(&self.action) {
            let has_ip = self.client_ip.as_deref().is_some_and(|s| !s.is_empty());
            let has_agent = self.user_agent.as_deref().is_some_and(|s| !s.is_empty());
            if !has_ip || !has_agent {
                return Err(StoreError::AuditViolation(format!(
                    "security-critical action {} requires client_ip and user_agent",
                    self.action
                )));
            }
        }
        Ok(())
    }
}

/// Persisted audit entry.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Uuid,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Security event recorded alongside an audit entry.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub audit_log_id: Uuid,
    pub event_type: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Authorization decision recorded alongside an audit entry.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub id: Uuid,
    pub audit_log_id: Uuid,
    pub resource: String,
    pub action: String,
    pub allowed: bool,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_entry() -> NewAuditEntry {
        NewAuditEntry::builder()
            .user_id(Uuid::new_v4())
            .action("campaign_progress")
            .build()
    }

    #[test]
    fn valid_entry_passes() {
        valid_entry().validate().unwrap();
    }

    #[test]
    fn nil_user_id_is_rejected() {
        let entry = NewAuditEntry::builder()
            .user_id(Uuid::nil())
            .action("campaign_progress")
            .build();
        assert!(matches!(
            entry.validate().unwrap_err(),
            StoreError::AuditViolation(_)
        ));
    }

    #[test]
    fn empty_action_is_rejected() {
        let entry = NewAuditEntry::builder()
            .user_id(Uuid::new_v4())
            .action("  ")
            .build();
        assert!(entry.validate().is_err());
    }

    #[test]
    fn entity_type_requires_entity_id() {
        let mut entry = valid_entry();
        entry.entity_type = Some("campaign".to_string());
        assert!(entry.validate().is_err());

        entry.entity_id = Some(Uuid::nil());
        assert!(entry.validate().is_err());

        entry.entity_id = Some(Uuid::new_v4());
        entry.validate().unwrap();
    }

    #[test]
    fn security_critical_action_requires_client_identity() {
        let actor = Actor::new(Uuid::new_v4());
        let entry = NewAuditEntry::for_actor(&actor, "campaign_start");
        assert!(entry.validate().is_err());

        let actor = Actor::with_client(actor.user_id, "203.0.113.9", "engine-cli/1.0");
        let entry = NewAuditEntry::for_actor(&actor, "campaign_start");
        entry.validate().unwrap();
    }

    #[test]
    fn non_critical_action_needs_no_client_identity() {
        let entry = valid_entry();
        assert!(!is_security_critical(&entry.action));
        entry.validate().unwrap();
    }

    #[test]
    fn the_enumerated_actions_are_critical() {
        for action in ["campaign_start", "user_login", "permission_change"] {
            assert!(is_security_critical(action));
        }
        assert!(!is_security_critical("campaign_progress"));
    }
}
