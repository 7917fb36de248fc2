//! Campaign domain: model, persistence, state machine, control plane and
//! the phase-executor contract.

pub mod control;
pub mod executor;
pub mod machine;
pub mod model;
pub mod runtime;
pub mod store;

pub use control::{CommandOutcome, ControlPlane};
pub use executor::{
    ExecutorFeature, ExecutorRegistry, ExecutorStatus, PhaseContext, PhaseExecutor, PhaseProgress,
    ResourceEstimate, ValidationIssue, ValidationOutcome,
};
pub use machine::{
    campaign_completeness, derive_completeness, phase_snapshot, validate_transition,
    CampaignAction, CampaignMachine, PhaseBatch,
};
pub use model::{Campaign, CampaignPhase, Completeness, PhaseStatus};
pub use store::CampaignFilter;
