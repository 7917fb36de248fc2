// Kernel - core infrastructure with dependency injection
//
// The EngineKernel holds shared infrastructure (database, transactions,
// job queue, metrics, notifications) and is wired through constructors.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in domain layers.

pub mod engine_kernel;
pub mod idempotency;
pub mod jobs;
pub mod metrics;
pub mod service;
pub mod stream_hub;
pub mod tx;

pub use engine_kernel::EngineKernel;
pub use idempotency::{IdempotencyCache, IdempotencySweeper};
pub use metrics::{MetricsWriter, QueryPerformanceRecorder, QuerySample};
pub use service::{spawn_service, Service};
pub use stream_hub::{campaign_topic, CampaignEvent, StreamHub};
pub use tx::{PreparedStatementManager, TransactionManager, TxOptions};
