//! Campaign state machine.
//!
//! Owns the legal transitions of `(current_phase, phase_status)` and the
//! progress aggregates. The transition table is pure decision logic; the
//! orchestration methods persist through managed transactions, serialising
//! all writes within a campaign on the campaign row lock.
//!
//! ```text
//! not_started -> in_progress <-> paused
//! in_progress -> completed | failed | cancelled
//! paused      -> in_progress | cancelled
//! ```

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::model::{Campaign, CampaignPhase, Completeness, PhaseStatus};
use super::store;
use crate::common::StoreError;
use crate::domains::leads::model::{
    AnalysisUpdate, DomainStatusUpdate, NewGeneratedDomain, ValidationCheck,
};
use crate::domains::leads::store as leads_store;
use crate::kernel::jobs::EnqueueOptions;
use crate::kernel::{EngineKernel, TxOptions};

// ============================================================================
// Transition table (pure)
// ============================================================================

/// Control-plane command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl CampaignAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignAction::Start => "start",
            CampaignAction::Pause => "pause",
            CampaignAction::Resume => "resume",
            CampaignAction::Stop => "stop",
        }
    }

    /// Audit action name for this command.
    pub fn audit_action(&self) -> &'static str {
        match self {
            CampaignAction::Start => "campaign_start",
            CampaignAction::Pause => "campaign_pause",
            CampaignAction::Resume => "campaign_resume",
            CampaignAction::Stop => "campaign_stop",
        }
    }

    /// Statuses the campaign must be in for this action to be legal.
    pub fn expected(&self) -> &'static [PhaseStatus] {
        match self {
            CampaignAction::Start => &[PhaseStatus::NotStarted],
            CampaignAction::Pause => &[PhaseStatus::InProgress],
            CampaignAction::Resume => &[PhaseStatus::Paused],
            CampaignAction::Stop => &[PhaseStatus::InProgress, PhaseStatus::Paused],
        }
    }

    /// Status the action transitions into.
    pub fn target(&self) -> PhaseStatus {
        match self {
            CampaignAction::Start | CampaignAction::Resume => PhaseStatus::InProgress,
            CampaignAction::Pause => PhaseStatus::Paused,
            CampaignAction::Stop => PhaseStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for CampaignAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check an action against the persisted status.
///
/// Illegal transitions fail with `StateMismatch { expected, actual, action }`.
pub fn validate_transition(action: CampaignAction, actual: PhaseStatus) -> Result<(), StoreError> {
    if action.expected().contains(&actual) {
        return Ok(());
    }
    let expected = action
        .expected()
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("|");
    Err(StoreError::state_mismatch(
        expected,
        actual.as_str(),
        action.as_str(),
    ))
}

/// Derive campaign-level completeness from per-phase statuses.
///
/// This derivation is the single source of truth exposed to readers:
/// `complete` iff every phase completed, `degraded` iff any failed,
/// `partial` iff any phase has begun without all completing, `pending`
/// otherwise.
pub fn derive_completeness(statuses: &[PhaseStatus]) -> Completeness {
    if statuses.iter().any(|s| *s == PhaseStatus::Failed) {
        return Completeness::Degraded;
    }
    if !statuses.is_empty() && statuses.iter().all(|s| *s == PhaseStatus::Completed) {
        return Completeness::Complete;
    }
    if statuses.iter().any(|s| {
        matches!(
            s,
            PhaseStatus::InProgress | PhaseStatus::Paused | PhaseStatus::Completed
        )
    }) {
        return Completeness::Partial;
    }
    Completeness::Pending
}

/// Per-phase status snapshot derived from the campaign row.
///
/// Phases before the current one completed (a later phase only starts after
/// its predecessor finishes); later phases have not started.
pub fn phase_snapshot(campaign: &Campaign) -> Vec<(CampaignPhase, PhaseStatus)> {
    let current = campaign.current_phase.index();
    CampaignPhase::ALL
        .iter()
        .enumerate()
        .map(|(index, phase)| {
            let status = match index.cmp(&current) {
                std::cmp::Ordering::Less => PhaseStatus::Completed,
                std::cmp::Ordering::Equal => campaign.phase_status,
                std::cmp::Ordering::Greater => PhaseStatus::NotStarted,
            };
            (*phase, status)
        })
        .collect()
}

/// Completeness of a campaign, derived from its phase snapshot.
pub fn campaign_completeness(campaign: &Campaign) -> Completeness {
    let statuses: Vec<PhaseStatus> = phase_snapshot(campaign)
        .into_iter()
        .map(|(_, status)| status)
        .collect();
    derive_completeness(&statuses)
}

// ============================================================================
// Phase batch result
// ============================================================================

/// Everything a finished phase batch writes back.
#[derive(Debug, Clone, Default)]
pub struct PhaseBatch {
    pub processed_items: i64,
    pub total_items: i64,
    /// New rows produced by the generation phase.
    pub generated: Vec<NewGeneratedDomain>,
    /// DNS/HTTP validation outcomes for the batch.
    pub status_updates: Vec<DomainStatusUpdate>,
    /// Lead classification from the analysis phase.
    pub analysis_updates: Vec<AnalysisUpdate>,
    /// Phase aggregate blob persisted on the campaign row.
    pub aggregate: Option<serde_json::Value>,
}

// ============================================================================
// Machine
// ============================================================================

/// Persistence-side of the state machine.
pub struct CampaignMachine {
    kernel: Arc<EngineKernel>,
}

impl CampaignMachine {
    pub fn new(kernel: Arc<EngineKernel>) -> Self {
        Self { kernel }
    }

    /// Atomic progress update, serialised on the campaign row lock.
    ///
    /// No-op once the phase is terminal; out-of-range input is rejected
    /// before any write.
    pub async fn update_progress(
        &self,
        campaign_id: Uuid,
        processed_items: i64,
        total_items: i64,
    ) -> Result<Campaign, StoreError> {
        if processed_items < 0 || total_items < 0 {
            return Err(StoreError::validation(
                "processed_items",
                "out_of_range",
                "progress counters must be non-negative",
            ));
        }
        if processed_items > total_items {
            return Err(StoreError::validation(
                "processed_items",
                "out_of_range",
                "processed_items must not exceed total_items",
            ));
        }

        self.kernel
            .tx
            .with_transaction("campaigns.update_progress", TxOptions::default(), |tx| {
                Box::pin(async move {
                    let current = Campaign::find_by_id_for_update(campaign_id, &mut **tx).await?;
                    if current.phase_status.is_terminal() {
                        // Terminal phases admit no further progress writes.
                        return Ok(current);
                    }
                    store::update_progress(campaign_id, processed_items, total_items, &mut **tx)
                        .await
                })
            })
            .await
    }

    /// Write back a completed phase batch and advance the pipeline.
    ///
    /// In one transaction: bulk domain writes, the phase aggregate, final
    /// progress, then either advance to the next phase or mark the campaign
    /// completed. The next phase's job is enqueued after commit.
    pub async fn complete_phase(
        &self,
        campaign_id: Uuid,
        phase: CampaignPhase,
        batch: PhaseBatch,
    ) -> Result<Campaign, StoreError> {
        let started = std::time::Instant::now();
        let result = self
            .kernel
            .tx
            .with_transaction("campaigns.complete_phase", TxOptions::default(), |tx| {
                let batch = batch.clone();
                Box::pin(async move {
                    let current = Campaign::find_by_id_for_update(campaign_id, &mut **tx).await?;
                    if current.current_phase != phase {
                        return Err(StoreError::state_mismatch(
                            phase.as_job_type(),
                            current.current_phase.as_job_type(),
                            "complete_phase",
                        ));
                    }
                    // A stop that landed while the batch was executing wins:
                    // a terminal phase is never resurrected by a writeback.
                    if current.phase_status.is_terminal() {
                        return Err(StoreError::state_mismatch(
                            PhaseStatus::InProgress.as_str(),
                            current.phase_status.as_str(),
                            "complete_phase",
                        ));
                    }

                    if !batch.generated.is_empty() {
                        leads_store::bulk_insert(campaign_id, &batch.generated, &mut **tx).await?;
                    }
                    if !batch.status_updates.is_empty() {
                        let check = match phase {
                            CampaignPhase::DnsValidation => ValidationCheck::Dns,
                            CampaignPhase::HttpValidation => ValidationCheck::Http,
                            _ => {
                                return Err(StoreError::validation(
                                    "status_updates",
                                    "unexpected",
                                    "status updates are only valid for validation phases",
                                ))
                            }
                        };
                        leads_store::bulk_update_validation_status(
                            campaign_id,
                            check,
                            &batch.status_updates,
                            &mut **tx,
                        )
                        .await?;
                    }
                    if !batch.analysis_updates.is_empty() {
                        leads_store::apply_analysis_updates(
                            campaign_id,
                            &batch.analysis_updates,
                            &mut **tx,
                        )
                        .await?;
                    }
                    if let Some(aggregate) = &batch.aggregate {
                        store::set_phase_aggregate(campaign_id, phase, aggregate, &mut **tx)
                            .await?;
                    }
                    if batch.total_items > 0 {
                        store::update_progress(
                            campaign_id,
                            batch.processed_items,
                            batch.total_items,
                            &mut **tx,
                        )
                        .await?;
                    }

                    match phase.next() {
                        Some(next) => {
                            store::finish_phase(campaign_id, PhaseStatus::Completed, false, &mut **tx)
                                .await?;
                            store::advance_phase(campaign_id, next, &mut **tx).await
                        }
                        None => {
                            store::finish_phase(campaign_id, PhaseStatus::Completed, true, &mut **tx)
                                .await
                        }
                    }
                })
            })
            .await;

        self.kernel.metrics.observe(
            "campaigns.complete_phase",
            started.elapsed(),
            1,
            result.is_err(),
        );
        let campaign = result?;

        // Enqueue the next phase's work once the transition is durable.
        if campaign.current_phase != phase && !campaign.phase_status.is_terminal() {
            let next_type = campaign.current_phase.as_job_type();
            self.kernel
                .job_queue
                .enqueue(EnqueueOptions::immediate(campaign_id, next_type))
                .await?;
            info!(
                campaign_id = %campaign_id,
                phase = %campaign.current_phase,
                "next phase enqueued"
            );
        } else {
            info!(campaign_id = %campaign_id, "campaign completed");
        }

        Ok(campaign)
    }

    /// Mark the active phase failed. The campaign keeps its prior progress.
    pub async fn fail_phase(
        &self,
        campaign_id: Uuid,
        reason: &str,
    ) -> Result<Campaign, StoreError> {
        let reason = reason.to_string();
        self.kernel
            .tx
            .with_transaction("campaigns.fail_phase", TxOptions::default(), |tx| {
                let reason = reason.clone();
                Box::pin(async move {
                    let current = Campaign::find_by_id_for_update(campaign_id, &mut **tx).await?;
                    if current.phase_status.is_terminal() {
                        return Ok(current);
                    }
                    info!(campaign_id = %campaign_id, reason = %reason, "phase failed");
                    store::finish_phase(campaign_id, PhaseStatus::Failed, false, &mut **tx).await
                })
            })
            .await
    }

    /// Cascading delete of a campaign and its children in one transaction.
    pub async fn delete_campaign(&self, campaign_id: Uuid) -> Result<(), StoreError> {
        self.kernel
            .tx
            .with_transaction("campaigns.delete", TxOptions::default(), |tx| {
                Box::pin(async move { store::delete_cascade(campaign_id, tx).await })
            })
            .await
    }
}
