//! Phase executor contract.
//!
//! Collaborators implementing a phase (domain generation, DNS probing, HTTP
//! probing, analysis) register an executor here. The core calls only through
//! this contract and the executor never touches the data model directly: it
//! receives its configuration, reports progress through a channel, and
//! returns the batch for the state machine to write back.
//!
//! The registry is wired through the startup context; there is no global.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::machine::PhaseBatch;
use super::model::CampaignPhase;
use crate::common::StoreError;

/// Optional capabilities an executor can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorFeature {
    Pause,
    Resume,
    Cancel,
    ProgressReporting,
    ResourceEstimation,
}

/// One problem found while validating a phase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Outcome of configuration validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    pub fn invalid(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: false,
            issues,
        }
    }
}

/// Rough resource estimate for a configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub estimated_items: i64,
    pub estimated_duration_secs: Option<i64>,
}

/// Executor-reported state for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorStatus {
    #[default]
    Idle,
    Preparing,
    Executing,
    Paused,
    Completed,
}

/// Everything an executor needs to run one phase job.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub campaign_id: Uuid,
    pub job_id: Uuid,
    /// Opaque phase configuration carried on the job payload.
    pub config: Option<serde_json::Value>,
}

/// Progress report sent through the execution channel.
#[derive(Debug, Clone, Copy)]
pub struct PhaseProgress {
    pub processed_items: i64,
    pub total_items: i64,
}

/// Contract implemented by phase collaborators.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// The pipeline phase this executor serves.
    fn phase(&self) -> CampaignPhase;

    /// Validate a phase configuration before any work is enqueued.
    async fn validate_configuration(&self, config: &serde_json::Value) -> ValidationOutcome;

    /// Set up any state the execution needs. Default: nothing.
    async fn prepare(&self, ctx: &PhaseContext) -> Result<(), StoreError> {
        let _ = ctx;
        Ok(())
    }

    /// Run the phase, reporting progress through the channel. The returned
    /// batch is written back by the state machine.
    async fn execute(
        &self,
        ctx: &PhaseContext,
        progress: mpsc::Sender<PhaseProgress>,
    ) -> Result<PhaseBatch, StoreError>;

    async fn pause(&self, campaign_id: Uuid) -> Result<(), StoreError> {
        let _ = campaign_id;
        Ok(())
    }

    async fn resume(&self, campaign_id: Uuid) -> Result<(), StoreError> {
        let _ = campaign_id;
        Ok(())
    }

    async fn cancel(&self, campaign_id: Uuid) -> Result<(), StoreError> {
        let _ = campaign_id;
        Ok(())
    }

    async fn status(&self, campaign_id: Uuid) -> ExecutorStatus {
        let _ = campaign_id;
        ExecutorStatus::Idle
    }

    fn estimate_resources(&self, config: &serde_json::Value) -> ResourceEstimate {
        let _ = config;
        ResourceEstimate::default()
    }

    /// Feature probe; executors opt in to optional capabilities.
    fn supports(&self, feature: ExecutorFeature) -> bool {
        let _ = feature;
        false
    }
}

/// Registry mapping each phase to its executor.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<CampaignPhase, Arc<dyn PhaseExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its own phase. Last registration wins.
    pub fn register(&mut self, executor: Arc<dyn PhaseExecutor>) {
        self.executors.insert(executor.phase(), executor);
    }

    pub fn get(&self, phase: CampaignPhase) -> Option<Arc<dyn PhaseExecutor>> {
        self.executors.get(&phase).cloned()
    }

    pub fn registered_phases(&self) -> Vec<CampaignPhase> {
        self.executors.keys().copied().collect()
    }
}
