//! Long-running service trait with cooperative shutdown.
//!
//! Background components (job workers, the idempotency sweeper, the metrics
//! writer) implement [`Service`] and run until the shared cancellation token
//! fires, then drain and exit.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// A long-running background service.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled. Implementations must observe the
    /// token at every suspension point and drain in-flight work on exit.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Spawn a service onto the runtime, logging its exit.
pub fn spawn_service(
    service: Box<dyn Service>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let name = service.name();
    tokio::spawn(async move {
        match service.run(shutdown).await {
            Ok(()) => tracing::info!(service = name, "service stopped"),
            Err(e) => tracing::error!(service = name, error = %e, "service exited with error"),
        }
    })
}
