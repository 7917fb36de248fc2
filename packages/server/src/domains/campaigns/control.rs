//! Control plane for campaign commands.
//!
//! Accepts `start`, `pause`, `resume` and `stop`, each carrying a campaign
//! ID and an optional idempotency key. Command order:
//!
//! 1. consult the idempotency cache - a hit returns the cached outcome
//!    verbatim, including cached errors;
//! 2. open a managed transaction with retry;
//! 3. read the persisted `phase_status` under the row lock and validate the
//!    transition;
//! 4. apply it (start also seeds the first phase's job; stop cancels
//!    outstanding jobs);
//! 5. write the audit entry;
//! 6. cache the outcome and return.
//!
//! The SSE notification fires after commit, only on the non-cached path, so
//! duplicate commands produce at most one notification per idempotency
//! window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::machine::{validate_transition, CampaignAction};
use super::model::{Campaign, CampaignPhase, PhaseStatus};
use super::store;
use crate::common::StoreError;
use crate::domains::audit::model::{Actor, NewAuditEntry};
use crate::domains::audit::store as audit_store;
use crate::kernel::idempotency::IdempotencyCache;
use crate::kernel::jobs::CampaignJob;
use crate::kernel::stream_hub::CampaignEvent;
use crate::kernel::{EngineKernel, TxOptions};

/// Result of a control-plane command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub current_phase: CampaignPhase,
    pub phase_status: PhaseStatus,
    pub sequence_number: i64,
}

impl CommandOutcome {
    fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            current_phase: campaign.current_phase,
            phase_status: campaign.phase_status,
            sequence_number: campaign.sequence_number,
        }
    }
}

/// The campaign control plane.
pub struct ControlPlane {
    kernel: Arc<EngineKernel>,
    cache: IdempotencyCache<CommandOutcome>,
}

impl ControlPlane {
    pub fn new(kernel: Arc<EngineKernel>) -> Self {
        Self::with_cache(kernel, IdempotencyCache::new())
    }

    pub fn with_cache(kernel: Arc<EngineKernel>, cache: IdempotencyCache<CommandOutcome>) -> Self {
        Self { kernel, cache }
    }

    /// The command cache, for wiring the background sweeper.
    pub fn cache(&self) -> &IdempotencyCache<CommandOutcome> {
        &self.cache
    }

    pub async fn start(
        &self,
        campaign_id: Uuid,
        actor: &Actor,
        idempotency_key: Option<&str>,
    ) -> Result<CommandOutcome, StoreError> {
        self.execute(CampaignAction::Start, campaign_id, actor, idempotency_key)
            .await
    }

    pub async fn pause(
        &self,
        campaign_id: Uuid,
        actor: &Actor,
        idempotency_key: Option<&str>,
    ) -> Result<CommandOutcome, StoreError> {
        self.execute(CampaignAction::Pause, campaign_id, actor, idempotency_key)
            .await
    }

    pub async fn resume(
        &self,
        campaign_id: Uuid,
        actor: &Actor,
        idempotency_key: Option<&str>,
    ) -> Result<CommandOutcome, StoreError> {
        self.execute(CampaignAction::Resume, campaign_id, actor, idempotency_key)
            .await
    }

    pub async fn stop(
        &self,
        campaign_id: Uuid,
        actor: &Actor,
        idempotency_key: Option<&str>,
    ) -> Result<CommandOutcome, StoreError> {
        self.execute(CampaignAction::Stop, campaign_id, actor, idempotency_key)
            .await
    }

    async fn execute(
        &self,
        action: CampaignAction,
        campaign_id: Uuid,
        actor: &Actor,
        idempotency_key: Option<&str>,
    ) -> Result<CommandOutcome, StoreError> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.cache.get(key).await {
                info!(
                    campaign_id = %campaign_id,
                    action = %action,
                    key,
                    "idempotency hit, returning cached outcome"
                );
                return cached;
            }
        }

        let result = self.run_command(action, campaign_id, actor).await;

        if let Some(key) = idempotency_key {
            self.cache.set(key, result.clone()).await;
        }

        if let Ok(outcome) = &result {
            self.kernel
                .hub
                .publish_campaign_event(&CampaignEvent {
                    campaign_id,
                    action: action.as_str().to_string(),
                    current_phase: outcome.current_phase.as_job_type().to_string(),
                    phase_status: outcome.phase_status.as_str().to_string(),
                    sequence_number: outcome.sequence_number,
                })
                .await;
        }

        result
    }

    async fn run_command(
        &self,
        action: CampaignAction,
        campaign_id: Uuid,
        actor: &Actor,
    ) -> Result<CommandOutcome, StoreError> {
        let actor = actor.clone();
        let started = std::time::Instant::now();
        let result = self
            .kernel
            .tx
            .with_campaign_transaction(
                "campaigns.control",
                TxOptions::default(),
                move |tx| {
                    let actor = actor.clone();
                    Box::pin(async move {
                        let campaign =
                            Campaign::find_by_id_for_update(campaign_id, &mut **tx).await?;
                        validate_transition(action, campaign.phase_status)?;

                        let updated = store::apply_control_transition(
                            campaign_id,
                            action.target(),
                            action == CampaignAction::Start,
                            &mut **tx,
                        )
                        .await?;

                        let mut cancelled_jobs = 0u64;
                        match action {
                            CampaignAction::Start => {
                                CampaignJob::immediate(
                                    campaign_id,
                                    updated.current_phase.as_job_type(),
                                )
                                .insert(&mut **tx)
                                .await?;
                            }
                            CampaignAction::Stop => {
                                cancelled_jobs =
                                    CampaignJob::cancel_for_campaign(campaign_id, &mut **tx)
                                        .await?;
                            }
                            CampaignAction::Pause | CampaignAction::Resume => {}
                        }

                        let entry = NewAuditEntry::for_actor(&actor, action.audit_action())
                            .entity("campaign", campaign_id)
                            .with_details(json!({
                                "from": campaign.phase_status,
                                "to": updated.phase_status,
                                "current_phase": updated.current_phase,
                                "cancelled_jobs": cancelled_jobs,
                            }));
                        audit_store::insert(&entry, &mut **tx).await?;

                        Ok(CommandOutcome::from_campaign(&updated))
                    })
                },
            )
            .await;

        self.kernel.metrics.observe(
            &format!("campaigns.control.{action}"),
            started.elapsed(),
            1,
            result.is_err(),
        );

        let outcome = result?;
        info!(
            campaign_id = %campaign_id,
            action = %action,
            phase_status = %outcome.phase_status,
            sequence = outcome.sequence_number,
            "control command applied"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_outcome_from_campaign() {
        let campaign = Campaign::builder()
            .name("c")
            .user_id(Uuid::new_v4())
            .phase_status(PhaseStatus::Paused)
            .sequence_number(4i64)
            .build();
        let outcome = CommandOutcome::from_campaign(&campaign);
        assert_eq!(outcome.phase_status, PhaseStatus::Paused);
        assert_eq!(outcome.sequence_number, 4);
        assert_eq!(outcome.current_phase, CampaignPhase::DomainGeneration);
    }
}
