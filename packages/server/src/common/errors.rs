//! Typed error taxonomy shared by every store and kernel component.
//!
//! Errors are values, not strings. The variants map onto the wire taxonomy
//! (404 / 409 / 422 / 500) and drive retry decisions in the transaction
//! manager: only `Database` errors whose message matches the retryable
//! pattern set are ever retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type returned by all persistence and control-plane operations.
///
/// Cloneable so that control-plane outcomes (including failures) can be
/// memoised verbatim by the idempotency cache.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    /// Row not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation (409).
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A status transition conflicted with the persisted state (409).
    #[error("state mismatch on {action}: expected {expected}, actual {actual}")]
    StateMismatch {
        expected: String,
        actual: String,
        action: String,
    },

    /// Input rejected before any write (422).
    #[error("validation failed on {field}: {message}")]
    Validation {
        field: String,
        code: String,
        message: String,
    },

    /// An audit entry missing a valid user identity.
    /// Fatal; never retried, never silently dropped.
    #[error("audit violation: {0}")]
    AuditViolation(String),

    /// The caller's deadline fired while the operation was in flight.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Database error carried as its display string. Retryability is decided
    /// by the transaction manager's pattern matcher, nowhere else.
    #[error("database error: {0}")]
    Database(String),

    /// Anything else (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Construct a `NotFound` for an entity/id pair.
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound(format!("{entity} {id}"))
    }

    /// Construct a `StateMismatch` for a rejected transition.
    pub fn state_mismatch(
        expected: impl Into<String>,
        actual: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        StoreError::StateMismatch {
            expected: expected.into(),
            actual: actual.into(),
            action: action.into(),
        }
    }

    /// Construct a `Validation` error for a single field.
    pub fn validation(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StoreError::Validation {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// The HTTP status the wire layer maps this variant to.
    pub fn http_status(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::DuplicateEntry(_) | StoreError::StateMismatch { .. } => 409,
            StoreError::Validation { .. } => 422,
            StoreError::AuditViolation(_)
            | StoreError::Cancelled(_)
            | StoreError::Database(_)
            | StoreError::Internal(_) => 500,
        }
    }

    /// Whether this variant is even a candidate for automatic retry.
    ///
    /// Only database errors qualify; the transaction manager then consults
    /// the pattern set. Not-found, duplicates, validation, state mismatches,
    /// audit violations and cancellations are never retried.
    pub fn is_retry_candidate(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::DuplicateEntry(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                StoreError::Validation {
                    field: "id".to_string(),
                    code: "referenced".to_string(),
                    message: db.message().to_string(),
                }
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}
