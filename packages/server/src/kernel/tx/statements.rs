//! Prepared-statement tracking.
//!
//! sqlx prepares and caches statements per connection under the hood; this
//! manager tracks every logical statement the application holds open so the
//! same observability contract as the transaction registry applies: release
//! on every exit path, and a warning for statements alive past a threshold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::warn;

use crate::common::StoreError;

/// In-memory record of one live prepared statement.
#[derive(Debug, Clone)]
pub struct StatementInfo {
    pub handle_id: u64,
    pub operation: String,
    pub query: String,
    started_at: Instant,
}

impl StatementInfo {
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

type Registry = Arc<Mutex<HashMap<u64, StatementInfo>>>;

struct StatementGuard {
    registry: Registry,
    handle_id: u64,
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("statement registry poisoned")
            .remove(&self.handle_id);
    }
}

/// Tracks live prepared statements and warns on stale ones.
#[derive(Clone)]
pub struct PreparedStatementManager {
    registry: Registry,
    next_id: Arc<AtomicU64>,
    warn_after: Duration,
}

impl PreparedStatementManager {
    pub fn new() -> Self {
        Self::with_warn_threshold(Duration::from_secs(60))
    }

    pub fn with_warn_threshold(warn_after: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            warn_after,
        }
    }

    /// Run `body` with a tracked statement.
    ///
    /// The statement is registered before the body runs and released on
    /// every exit path, including panics unwinding through the body.
    pub async fn with_prepared<T>(
        &self,
        query: &str,
        operation: &str,
        body: impl for<'q> FnOnce(&'q str) -> BoxFuture<'q, Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        let handle_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = StatementInfo {
            handle_id,
            operation: operation.to_string(),
            query: query.to_string(),
            started_at: Instant::now(),
        };
        self.registry
            .lock()
            .expect("statement registry poisoned")
            .insert(handle_id, info);
        let _guard = StatementGuard {
            registry: self.registry.clone(),
            handle_id,
        };

        body(query).await
    }

    /// Number of statements currently tracked.
    pub fn active_count(&self) -> usize {
        self.registry
            .lock()
            .expect("statement registry poisoned")
            .len()
    }

    /// Statements alive past the warn threshold.
    pub fn detect_stale(&self) -> Vec<StatementInfo> {
        let stale: Vec<StatementInfo> = self
            .registry
            .lock()
            .expect("statement registry poisoned")
            .values()
            .filter(|info| info.age() > self.warn_after)
            .cloned()
            .collect();
        for info in &stale {
            warn!(
                handle_id = info.handle_id,
                operation = %info.operation,
                age_ms = info.age().as_millis() as u64,
                "prepared statement exceeds age threshold"
            );
        }
        stale
    }
}

impl Default for PreparedStatementManager {
    fn default() -> Self {
        Self::new()
    }
}
