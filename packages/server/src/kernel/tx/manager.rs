//! Scoped transaction lifecycle management.
//!
//! Every database transaction in the system is opened through
//! [`TransactionManager`], which guarantees release on every exit path
//! (commit, error, timeout), tracks in-flight transactions for leak
//! detection, and owns the retry policy for transient failures.
//!
//! The manager is a constructed object wired through the kernel at startup;
//! nothing reaches for it through a global.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, warn};

use crate::common::StoreError;

/// Messages that indicate a transient failure worth retrying.
static RETRYABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(connection refused|connection reset|timeout|deadlock|serialization failure|could not serialize access|database is locked|server closed the connection)",
    )
    .expect("retryable pattern")
});

/// Whether an error is transient according to the retryable pattern set.
///
/// Typed variants (not-found, duplicates, validation, state mismatch, audit
/// violations, cancellation) are never retried regardless of their message.
pub fn is_retryable(err: &StoreError) -> bool {
    err.is_retry_candidate() && RETRYABLE_PATTERN.is_match(&err.to_string())
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(&self) -> Option<&'static str> {
        match self {
            // Read committed is the server default; no SET needed.
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => {
                Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            }
            IsolationLevel::Serializable => Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"),
        }
    }
}

/// Options for a managed transaction.
#[derive(Debug, Clone)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub timeout: Duration,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Retry policy for [`TransactionManager::with_campaign_transaction`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// In-memory record of one in-flight transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub handle_id: u64,
    pub operation: String,
    pub origin: &'static Location<'static>,
    started_at: Instant,
}

impl TransactionInfo {
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Body type for managed transactions.
pub type TxBody<'t, T> = BoxFuture<'t, Result<T, StoreError>>;

type Registry = Arc<Mutex<HashMap<u64, TransactionInfo>>>;

/// Removes the tracking record on drop so a panicking body can never leak
/// its registry entry.
struct TrackGuard {
    registry: Registry,
    handle_id: u64,
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("transaction registry poisoned")
            .remove(&self.handle_id);
    }
}

/// One step of a multi-step boundary.
pub struct BoundaryStep {
    name: String,
    run: Box<dyn for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, ()> + Send>,
    rollback:
        Option<Box<dyn for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, ()> + Send>>,
}

/// A named multi-step unit of work executed as one transaction.
///
/// On failure the rollbacks declared by completed steps run in reverse
/// order before the transaction itself is rolled back. Rollback closures
/// are for compensating work outside the transaction's own write set
/// (counters, in-memory registrations); plain row writes are undone by the
/// transaction rollback anyway.
pub struct Boundary {
    name: String,
    steps: Vec<BoundaryStep>,
}

impl Boundary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step with no compensating rollback.
    pub fn step<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, ()>
            + Send
            + 'static,
    {
        self.steps.push(BoundaryStep {
            name: name.into(),
            run: Box::new(run),
            rollback: None,
        });
        self
    }

    /// Add a step with a compensating rollback.
    pub fn step_with_rollback<F, R>(mut self, name: impl Into<String>, run: F, rollback: R) -> Self
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, ()>
            + Send
            + 'static,
        R: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, ()>
            + Send
            + 'static,
    {
        self.steps.push(BoundaryStep {
            name: name.into(),
            run: Box::new(run),
            rollback: Some(Box::new(rollback)),
        });
        self
    }
}

/// Process-wide owner of transaction lifecycles.
#[derive(Clone)]
pub struct TransactionManager {
    pool: PgPool,
    registry: Registry,
    next_id: Arc<AtomicU64>,
    retry: RetryOptions,
}

impl TransactionManager {
    pub fn new(pool: PgPool) -> Self {
        Self::with_retry(pool, RetryOptions::default())
    }

    pub fn with_retry(pool: PgPool, retry: RetryOptions) -> Self {
        Self {
            pool,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            retry,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `body` inside a managed transaction.
    ///
    /// Commits on `Ok`, rolls back on `Err` or when the timeout fires. A
    /// rollback failure on an already-closed transaction (the server killed
    /// it on deadline) is demoted to info and never masks the originating
    /// error.
    #[track_caller]
    pub fn with_transaction<'a, T, F>(
        &'a self,
        operation: &'a str,
        options: TxOptions,
        body: F,
    ) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, T> + Send + 'a,
    {
        let origin = Location::caller();
        Box::pin(async move { self.run_one(operation, options, body, origin).await })
    }

    /// Run `body` inside a managed transaction with retry on transient
    /// failures.
    ///
    /// Errors matching the retryable pattern set retry up to
    /// `max_retries` with linear backoff `retry_delay x attempt`; anything
    /// else breaks out immediately.
    #[track_caller]
    pub fn with_campaign_transaction<'a, T, F>(
        &'a self,
        operation: &'a str,
        options: TxOptions,
        body: F,
    ) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> Fn(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, T> + Send + Sync + 'a,
    {
        let origin = Location::caller();
        Box::pin(async move {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let result = self
                    .run_one(operation, options.clone(), &body, origin)
                    .await;
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) if is_retryable(&err) && attempt <= self.retry.max_retries => {
                        let delay = self.retry.retry_delay * attempt;
                        warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient transaction failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }

    /// Execute a named multi-step boundary as one transaction.
    ///
    /// On the first failing step, rollbacks declared by completed steps run
    /// in reverse order, then the transaction rolls back and the error
    /// propagates with boundary and step context.
    #[track_caller]
    pub fn execute_boundary<'a>(
        &'a self,
        boundary: Boundary,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let origin = Location::caller();
        Box::pin(async move {
            let name = boundary.name.clone();
            let mut tx = self.begin(&name, TxOptions::default(), origin).await?;
            let _guard = self.track(&name, origin);

            let mut completed: Vec<(
                String,
                Option<
                    Box<
                        dyn for<'t> FnOnce(
                                &'t mut Transaction<'static, Postgres>,
                            ) -> TxBody<'t, ()>
                            + Send,
                    >,
                >,
            )> = Vec::new();

            for step in boundary.steps {
                let step_name = step.name.clone();
                match (step.run)(&mut tx).await {
                    Ok(()) => completed.push((step_name, step.rollback)),
                    Err(err) => {
                        warn!(
                            boundary = %name,
                            step = %step_name,
                            error = %err,
                            "boundary step failed, compensating completed steps"
                        );
                        for (done_name, rollback) in completed.into_iter().rev() {
                            if let Some(rollback) = rollback {
                                if let Err(rb_err) = rollback(&mut tx).await {
                                    error!(
                                        boundary = %name,
                                        step = %done_name,
                                        error = %rb_err,
                                        "boundary compensation failed"
                                    );
                                }
                            }
                        }
                        Self::rollback_quietly(tx, &name).await;
                        return Err(match err {
                            StoreError::Database(msg) => StoreError::Database(format!(
                                "boundary {name}, step {step_name}: {msg}"
                            )),
                            other => other,
                        });
                    }
                }
            }

            tx.commit()
                .await
                .map_err(|e| StoreError::Database(format!("boundary {name} commit: {e}")))?;
            Ok(())
        })
    }

    /// Number of transactions currently in flight.
    pub fn active_count(&self) -> usize {
        self.registry
            .lock()
            .expect("transaction registry poisoned")
            .len()
    }

    /// Transactions older than `max_age`, reported with their operation name
    /// and originating call site.
    pub fn detect_leaks(&self, max_age: Duration) -> Vec<TransactionInfo> {
        let leaks: Vec<TransactionInfo> = self
            .registry
            .lock()
            .expect("transaction registry poisoned")
            .values()
            .filter(|info| info.age() > max_age)
            .cloned()
            .collect();
        for leak in &leaks {
            warn!(
                handle_id = leak.handle_id,
                operation = %leak.operation,
                origin = %leak.origin,
                age_ms = leak.age().as_millis() as u64,
                "transaction exceeds age threshold"
            );
        }
        leaks
    }

    /// Snapshot of every in-flight transaction.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        self.registry
            .lock()
            .expect("transaction registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    async fn run_one<T, F>(
        &self,
        operation: &str,
        options: TxOptions,
        body: F,
        origin: &'static Location<'static>,
    ) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxBody<'t, T> + Send,
    {
        let mut tx = self.begin(operation, options.clone(), origin).await?;
        let _guard = self.track(operation, origin);

        match tokio::time::timeout(options.timeout, body(&mut tx)).await {
            Ok(Ok(value)) => {
                tx.commit()
                    .await
                    .map_err(|e| StoreError::Database(format!("{operation} commit: {e}")))?;
                Ok(value)
            }
            Ok(Err(err)) => {
                Self::rollback_quietly(tx, operation).await;
                Err(err)
            }
            Err(_elapsed) => {
                // The server may have killed the transaction on deadline
                // already; rollback_quietly demotes that case.
                Self::rollback_quietly(tx, operation).await;
                Err(StoreError::Cancelled(format!(
                    "{operation}: transaction timed out after {:?}",
                    options.timeout
                )))
            }
        }
    }

    async fn begin(
        &self,
        operation: &str,
        options: TxOptions,
        _origin: &'static Location<'static>,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("{operation} begin: {e}")))?;

        if let Some(sql) = options.isolation.as_sql() {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("{operation} isolation: {e}")))?;
        }
        if options.read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("{operation} read-only: {e}")))?;
        }
        Ok(tx)
    }

    fn track(&self, operation: &str, origin: &'static Location<'static>) -> TrackGuard {
        let handle_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = TransactionInfo {
            handle_id,
            operation: operation.to_string(),
            origin,
            started_at: Instant::now(),
        };
        self.registry
            .lock()
            .expect("transaction registry poisoned")
            .insert(handle_id, info);
        TrackGuard {
            registry: self.registry.clone(),
            handle_id,
        }
    }

    async fn rollback_quietly(tx: Transaction<'static, Postgres>, operation: &str) {
        if let Err(e) = tx.rollback().await {
            let msg = e.to_string();
            // A transaction the server already closed (deadline, connection
            // reaped) cannot be rolled back again; that is expected.
            if msg.contains("closed") || msg.contains("already") {
                info!(operation, error = %msg, "rollback on closed transaction skipped");
            } else {
                error!(operation, error = %msg, "transaction rollback failed");
            }
        }
    }
}
