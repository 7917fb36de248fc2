//! Generated-domain model.
//!
//! One row per candidate domain produced by the generation phase. The DNS
//! and HTTP validators and the analysis phase all mutate these rows in bulk;
//! `rejection_reason` records why a domain left the lead set and follows
//! write-once semantics for terminal probe errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

// ============================================================================
// Enums
// ============================================================================

/// Stored probe status lattice for `dns_status` / `http_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "validation_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Pending,
    Ok,
    Error,
}

/// Incoming probe outcome reported by a validation phase.
///
/// `timeout` collapses to `error` in the stored status lattice but is kept
/// distinct in `rejection_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Ok,
    Pending,
    Error,
    Timeout,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok => "ok",
            ProbeOutcome::Pending => "pending",
            ProbeOutcome::Error => "error",
            ProbeOutcome::Timeout => "timeout",
        }
    }
}

/// Which probe a bulk status update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    Dns,
    Http,
}

impl ValidationCheck {
    pub fn status_column(&self) -> &'static str {
        match self {
            ValidationCheck::Dns => "dns_status",
            ValidationCheck::Http => "http_status",
        }
    }

    pub fn timeout_reason(&self) -> &'static str {
        match self {
            ValidationCheck::Dns => "dns_timeout",
            ValidationCheck::Http => "http_timeout",
        }
    }

    pub fn error_reason(&self) -> &'static str {
        match self {
            ValidationCheck::Dns => "dns_error",
            ValidationCheck::Http => "http_error",
        }
    }
}

/// Why a domain was excluded from (or kept in) the lead set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rejection_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Qualified,
    LowScore,
    NoKeywords,
    Parked,
    DnsError,
    DnsTimeout,
    HttpError,
    HttpTimeout,
    Pending,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Qualified => "qualified",
            RejectionReason::LowScore => "low_score",
            RejectionReason::NoKeywords => "no_keywords",
            RejectionReason::Parked => "parked",
            RejectionReason::DnsError => "dns_error",
            RejectionReason::DnsTimeout => "dns_timeout",
            RejectionReason::HttpError => "http_error",
            RejectionReason::HttpTimeout => "http_timeout",
            RejectionReason::Pending => "pending",
        }
    }

    /// Terminal probe errors follow write-once semantics.
    pub fn is_terminal_error(&self) -> bool {
        matches!(
            self,
            RejectionReason::DnsError
                | RejectionReason::DnsTimeout
                | RejectionReason::HttpError
                | RejectionReason::HttpTimeout
        )
    }
}

// ============================================================================
// Bulk update inputs
// ============================================================================

/// One tuple of a bulk DNS/HTTP status update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStatusUpdate {
    pub domain_name: String,
    pub outcome: ProbeOutcome,
    pub http_status_code: Option<i32>,
    pub page_title: Option<String>,
    pub last_checked_at: DateTime<Utc>,
}

/// One tuple of the analysis phase's lead classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisUpdate {
    pub domain_name: String,
    pub lead_score: f64,
    pub lead_status: String,
    pub rejection_reason: RejectionReason,
}

/// A domain produced by the generation phase, before insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGeneratedDomain {
    pub domain_name: String,
    pub offset_index: i64,
}

// ============================================================================
// GeneratedDomain model
// ============================================================================

pub(crate) const DOMAIN_COLUMNS: &str = r#"id, campaign_id, domain_name, offset_index,
       dns_status, http_status, http_status_code, http_title,
       lead_score, lead_status, rejection_reason, last_checked_at,
       created_at, updated_at"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct GeneratedDomain {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub campaign_id: Uuid,
    pub domain_name: String,
    pub offset_index: i64,

    #[builder(default, setter(strip_option))]
    pub dns_status: Option<ValidationState>,
    #[builder(default, setter(strip_option))]
    pub http_status: Option<ValidationState>,
    #[builder(default, setter(strip_option))]
    pub http_status_code: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub http_title: Option<String>,

    #[builder(default, setter(strip_option))]
    pub lead_score: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub lead_status: Option<String>,
    #[builder(default, setter(strip_option))]
    pub rejection_reason: Option<RejectionReason>,
    #[builder(default, setter(strip_option))]
    pub last_checked_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl GeneratedDomain {
    pub async fn find_by_name<'e, E: PgExecutor<'e>>(
        campaign_id: Uuid,
        domain_name: &str,
        db: E,
    ) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM generated_domains \
             WHERE campaign_id = $1 AND domain_name = $2"
        ))
        .bind(campaign_id)
        .bind(domain_name)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("generated_domains.find_by_name", e))?
        .ok_or_else(|| StoreError::not_found("generated domain", domain_name))
    }

    pub async fn count_for_campaign<'e, E: PgExecutor<'e>>(
        campaign_id: Uuid,
        db: E,
    ) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM generated_domains WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("generated_domains.count_for_campaign", e))
    }
}
