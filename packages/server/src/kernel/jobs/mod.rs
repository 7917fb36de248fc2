//! Job infrastructure for phase execution.
//!
//! - [`CampaignJob`] - job model with the at-most-once claim
//! - [`PostgresJobQueue`] - database-backed queue
//! - [`JobWorker`] - long-running service that polls and executes jobs
//! - [`JobRegistry`] - job-type to handler dispatch
//!
//! Phase business logic lives in the domains; this module only provides the
//! scheduling substrate.

mod job;
mod queue;
mod registry;
mod worker;

pub use job::{BusinessStatus, CampaignJob, JobStatus, RetryPolicy};
pub use queue::{EnqueueOptions, JobQueue, PostgresJobQueue};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use worker::{JobWorker, JobWorkerConfig};
