//! Wiring between the job substrate and the phase executors.
//!
//! At startup each pipeline phase gets a job handler registered under its
//! job type. The handler resolves the phase's executor, runs it with a
//! progress channel forwarding into the state machine, and writes the
//! finished batch back through [`CampaignMachine::complete_phase`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::executor::{ExecutorRegistry, PhaseContext};
use super::machine::CampaignMachine;
use super::model::CampaignPhase;
use crate::common::StoreError;
use crate::kernel::jobs::{CampaignJob, JobRegistry};

/// Register a job handler for every pipeline phase.
pub fn register_phase_handlers(
    registry: &mut JobRegistry,
    executors: Arc<ExecutorRegistry>,
    machine: Arc<CampaignMachine>,
) {
    for phase in CampaignPhase::ALL {
        let executors = executors.clone();
        let machine = machine.clone();
        registry.register(phase.as_job_type(), move |job| {
            run_phase_job(phase, job, executors.clone(), machine.clone())
        });
    }
}

/// Execute one claimed phase job end to end.
async fn run_phase_job(
    phase: CampaignPhase,
    job: CampaignJob,
    executors: Arc<ExecutorRegistry>,
    machine: Arc<CampaignMachine>,
) -> Result<(), StoreError> {
    let executor = executors.get(phase).ok_or_else(|| {
        StoreError::Internal(format!("no executor registered for phase {phase}"))
    })?;

    let ctx = PhaseContext {
        campaign_id: job.campaign_id,
        job_id: job.id,
        config: job.job_payload.clone(),
    };

    if let Some(config) = &ctx.config {
        let outcome = executor.validate_configuration(config).await;
        if !outcome.valid {
            // Misconfiguration is not transient; fail the phase outright.
            let message = outcome
                .issues
                .first()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .unwrap_or_else(|| "invalid phase configuration".to_string());
            machine.fail_phase(job.campaign_id, &message).await?;
            return Err(StoreError::validation("job_payload", "invalid", message));
        }
    }

    executor.prepare(&ctx).await?;

    // Forward executor progress into the state machine while it runs.
    let (progress_tx, mut progress_rx) = mpsc::channel::<super::executor::PhaseProgress>(16);
    let forwarder = {
        let machine = machine.clone();
        let campaign_id = job.campaign_id;
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if let Err(e) = machine
                    .update_progress(campaign_id, progress.processed_items, progress.total_items)
                    .await
                {
                    warn!(campaign_id = %campaign_id, error = %e, "progress update failed");
                }
            }
        })
    };

    let result = executor.execute(&ctx, progress_tx).await;
    // The executor dropped its sender; wait for the last forwarded update.
    let _ = forwarder.await;

    match result {
        Ok(batch) => {
            machine.complete_phase(job.campaign_id, phase, batch).await?;
            Ok(())
        }
        Err(e) => {
            // The claim already burned this attempt. If it was the last one,
            // no retry follows and the phase is failed for good.
            if job.attempts >= job.max_attempts {
                machine.fail_phase(job.campaign_id, &e.to_string()).await?;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::PostgresJobQueue;
    use crate::kernel::{
        EngineKernel, QueryPerformanceRecorder, StreamHub, TransactionManager,
    };
    use sqlx::PgPool;

    fn offline_machine() -> Arc<CampaignMachine> {
        // Lazy pool: never connects unless a query runs.
        let pool = PgPool::connect_lazy("postgres://localhost/offline").unwrap();
        let queue = Arc::new(PostgresJobQueue::new(pool.clone()));
        let (metrics, _rx) = QueryPerformanceRecorder::channel(100, 8);
        Arc::new(CampaignMachine::new(Arc::new(EngineKernel::new(
            pool.clone(),
            TransactionManager::new(pool),
            queue,
            StreamHub::new(),
            metrics,
        ))))
    }

    #[tokio::test]
    async fn every_pipeline_phase_gets_a_handler() {
        let mut registry = JobRegistry::new();
        register_phase_handlers(
            &mut registry,
            Arc::new(ExecutorRegistry::new()),
            offline_machine(),
        );

        for phase in CampaignPhase::ALL {
            assert!(registry.is_registered(phase.as_job_type()), "{phase}");
        }
        assert!(!registry.is_registered("mystery"));
    }
}
