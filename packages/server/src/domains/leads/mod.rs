//! Generated-domain (lead) domain: model, bulk updates, listings.

pub mod model;
pub mod store;

pub use model::{
    AnalysisUpdate, DomainStatusUpdate, GeneratedDomain, NewGeneratedDomain, ProbeOutcome,
    RejectionReason, ValidationCheck, ValidationState,
};
pub use store::{DomainListFilter, DomainSortKey, RejectionSummary};
