//! Audit and security-event domain.

pub mod model;
pub mod store;

pub use model::{
    is_security_critical, Actor, AuditLog, AuthorizationDecision, NewAuditEntry, SecurityEvent,
    SECURITY_CRITICAL_ACTIONS,
};
