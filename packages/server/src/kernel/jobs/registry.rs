//! Job registry mapping job types to execution handlers.
//!
//! Each phase registers its handler at startup (wired through the kernel,
//! never a global). When a worker claims a job it dispatches here without
//! knowing the concrete phase types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::job::CampaignJob;
use crate::common::StoreError;

type BoxedHandler = Box<
    dyn Fn(CampaignJob) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>
        + Send
        + Sync,
>;

/// Registry that maps job type strings to handlers.
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, BoxedHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a handler for a job type.
    ///
    /// The handler captures its dependencies at registration time; the
    /// registry itself stays domain-agnostic.
    pub fn register<F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        F: Fn(CampaignJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |job| Box::pin(handler(job)));
        self.registrations.insert(job_type, boxed);
    }

    /// Execute a claimed job using its registered handler.
    ///
    /// An unregistered job type is an internal error: the job was enqueued
    /// by code that no handler was wired for.
    pub async fn execute(&self, job: CampaignJob) -> Result<(), StoreError> {
        let handler = self
            .registrations
            .get(job.job_type.as_str())
            .ok_or_else(|| {
                StoreError::Internal(format!("no handler registered for job type {}", job.job_type))
            })?;
        handler(job).await
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    /// All registered job types.
    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registrations.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = JobRegistry::new();
        registry.register("dns_validation", |_job| async move { Ok(()) });

        assert!(registry.is_registered("dns_validation"));
        assert!(!registry.is_registered("unknown"));

        let job = CampaignJob::immediate(Uuid::new_v4(), "dns_validation");
        registry.execute(job).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_job_type_is_an_internal_error() {
        let registry = JobRegistry::new();
        let job = CampaignJob::immediate(Uuid::new_v4(), "mystery");
        let err = registry.execute(job).await.unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
    }
}
