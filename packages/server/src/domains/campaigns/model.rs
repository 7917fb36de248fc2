//! Campaign model.
//!
//! A campaign advances through the fixed phase pipeline
//! domain_generation -> dns_validation -> http_validation -> analysis.
//! `current_phase` and `phase_status` describe the active phase; progress
//! counters are monotone within a phase run and clamped server-side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "campaign_phase", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    #[default]
    DomainGeneration,
    DnsValidation,
    HttpValidation,
    Analysis,
}

impl CampaignPhase {
    /// Pipeline order, first to last.
    pub const ALL: [CampaignPhase; 4] = [
        CampaignPhase::DomainGeneration,
        CampaignPhase::DnsValidation,
        CampaignPhase::HttpValidation,
        CampaignPhase::Analysis,
    ];

    /// Job type string for this phase.
    pub fn as_job_type(&self) -> &'static str {
        match self {
            CampaignPhase::DomainGeneration => "domain_generation",
            CampaignPhase::DnsValidation => "dns_validation",
            CampaignPhase::HttpValidation => "http_validation",
            CampaignPhase::Analysis => "analysis",
        }
    }

    /// Parse a job type string back to a phase.
    pub fn from_job_type(job_type: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_job_type() == job_type)
    }

    /// The phase after this one, or None for the last phase.
    pub fn next(&self) -> Option<Self> {
        let index = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Position in the pipeline (0-based).
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }
}

impl std::fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_job_type())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "phase_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Paused => "paused",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses admit no further progress writes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Cancelled
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived campaign-level completeness, the single source of truth exposed
/// to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Pending,
    Partial,
    Complete,
    Degraded,
}

// ============================================================================
// Campaign model
// ============================================================================

pub(crate) const CAMPAIGN_COLUMNS: &str = r#"id, name, user_id, current_phase, phase_status,
       processed_items, total_items, progress_percentage, sequence_number,
       domains_data, dns_results, http_results, analysis_results,
       created_at, updated_at, started_at, completed_at"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Campaign {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub name: String,
    pub user_id: Uuid,

    #[builder(default)]
    pub current_phase: CampaignPhase,
    #[builder(default)]
    pub phase_status: PhaseStatus,

    #[builder(default = 0)]
    pub processed_items: i64,
    #[builder(default = 0)]
    pub total_items: i64,
    #[builder(default = 0.0)]
    pub progress_percentage: f64,
    #[builder(default = 0)]
    pub sequence_number: i64,

    #[builder(default, setter(strip_option))]
    pub domains_data: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub dns_results: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub http_results: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub analysis_results: Option<serde_json::Value>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("campaigns.find_by_id", e))?
        .ok_or_else(|| StoreError::not_found("campaign", id))
    }

    /// Lock the campaign row for the duration of the transaction.
    ///
    /// Progress and status writes within a campaign serialise on this lock.
    pub async fn find_by_id_for_update<'e, E: PgExecutor<'e>>(
        id: Uuid,
        db: E,
    ) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("campaigns.find_by_id_for_update", e))?
        .ok_or_else(|| StoreError::not_found("campaign", id))
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO campaigns (
                id, name, user_id, current_phase, phase_status,
                processed_items, total_items, progress_percentage, sequence_number,
                domains_data, dns_results, http_results, analysis_results,
                created_at, updated_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(self.user_id)
        .bind(self.current_phase)
        .bind(self.phase_status)
        .bind(self.processed_items)
        .bind(self.total_items)
        .bind(self.progress_percentage)
        .bind(self.sequence_number)
        .bind(&self.domains_data)
        .bind(&self.dns_results)
        .bind(&self.http_results)
        .bind(&self.analysis_results)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("campaigns.insert", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_pipeline_order() {
        assert_eq!(
            CampaignPhase::DomainGeneration.next(),
            Some(CampaignPhase::DnsValidation)
        );
        assert_eq!(
            CampaignPhase::DnsValidation.next(),
            Some(CampaignPhase::HttpValidation)
        );
        assert_eq!(
            CampaignPhase::HttpValidation.next(),
            Some(CampaignPhase::Analysis)
        );
        assert_eq!(CampaignPhase::Analysis.next(), None);
    }

    #[test]
    fn job_type_roundtrip() {
        for phase in CampaignPhase::ALL {
            assert_eq!(CampaignPhase::from_job_type(phase.as_job_type()), Some(phase));
        }
        assert_eq!(CampaignPhase::from_job_type("mystery"), None);
    }

    #[test]
    fn terminal_phase_statuses() {
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(PhaseStatus::Cancelled.is_terminal());
        assert!(!PhaseStatus::InProgress.is_terminal());
        assert!(!PhaseStatus::Paused.is_terminal());
        assert!(!PhaseStatus::NotStarted.is_terminal());
    }

    #[test]
    fn new_campaign_defaults() {
        let campaign = Campaign::builder()
            .name("acme-leads")
            .user_id(Uuid::new_v4())
            .build();
        assert_eq!(campaign.current_phase, CampaignPhase::DomainGeneration);
        assert_eq!(campaign.phase_status, PhaseStatus::NotStarted);
        assert_eq!(campaign.processed_items, 0);
        assert_eq!(campaign.progress_percentage, 0.0);
    }
}
