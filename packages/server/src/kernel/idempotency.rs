//! TTL'd in-memory idempotency cache for control-plane commands.
//!
//! Maps an opaque caller-supplied key to the memoised outcome of the command
//! that first ran under it - success or error, verbatim. A hit short-circuits
//! the control plane entirely: no state-machine work, no audit entry, no
//! event notification. Keys expire after the TTL (default 5 minutes); expired
//! entries are reclaimed by a background sweeper running at half the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::StoreError;
use crate::kernel::service::Service;

/// Default time-to-live for cached outcomes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<V> {
    outcome: Result<V, StoreError>,
    created_at: Instant,
}

/// In-memory key -> outcome cache with per-entry TTL.
///
/// `V` is the success payload; errors are cached as [`StoreError`] so a
/// retried 409 replays without touching the state machine. Within its TTL a
/// key resolves to exactly one outcome: `set` never overwrites a live entry.
#[derive(Clone)]
pub struct IdempotencyCache<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> IdempotencyCache<V> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a key. Returns the cached outcome if present and unexpired.
    pub async fn get(&self, key: &str) -> Option<Result<V, StoreError>> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.created_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.outcome.clone())
    }

    /// Store an outcome under a key.
    ///
    /// First write wins: a live entry is never overwritten, preserving the
    /// one-outcome-per-TTL invariant. An expired entry is replaced.
    pub async fn set(&self, key: &str, outcome: Result<V, StoreError>) {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(key) {
            if existing.created_at.elapsed() < self.ttl {
                return;
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                outcome,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries. Returns the number reclaimed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for IdempotencyCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweeper reclaiming expired cache entries.
///
/// Cadence is TTL/2 so no expired entry outlives a full extra TTL.
pub struct IdempotencySweeper<V> {
    cache: IdempotencyCache<V>,
}

impl<V: Clone + Send + Sync + 'static> IdempotencySweeper<V> {
    pub fn new(cache: IdempotencyCache<V>) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl<V: Clone + Send + Sync + 'static> Service for IdempotencySweeper<V> {
    fn name(&self) -> &'static str {
        "idempotency-sweeper"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let cadence = self.cache.ttl() / 2;
        let mut interval = tokio::time::interval(cadence);
        interval.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let reclaimed = self.cache.sweep().await;
                    if reclaimed > 0 {
                        debug!(reclaimed, "idempotency cache swept");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_set_returns_identical_outcome() {
        let cache: IdempotencyCache<String> = IdempotencyCache::new();
        cache.set("k1", Ok("paused".to_string())).await;

        let hit = cache.get("k1").await.unwrap();
        assert_eq!(hit.unwrap(), "paused");
    }

    #[tokio::test]
    async fn errors_are_cached_verbatim() {
        let cache: IdempotencyCache<String> = IdempotencyCache::new();
        let err = StoreError::state_mismatch("in_progress", "paused", "pause");
        cache.set("k2", Err(err.clone())).await;

        let hit = cache.get("k2").await.unwrap();
        assert_eq!(hit.unwrap_err(), err);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let cache: IdempotencyCache<String> = IdempotencyCache::new();
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache: IdempotencyCache<String> = IdempotencyCache::with_ttl(Duration::from_secs(10));
        cache.set("k", Ok("done".to_string())).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k").await.is_none());

        // After expiry the key may be re-set with a fresh outcome.
        cache.set("k", Ok("again".to_string())).await;
        assert_eq!(cache.get("k").await.unwrap().unwrap(), "again");
    }

    #[tokio::test(start_paused = true)]
    async fn live_entries_are_never_overwritten() {
        let cache: IdempotencyCache<String> = IdempotencyCache::with_ttl(Duration::from_secs(10));
        cache.set("k", Ok("first".to_string())).await;
        cache.set("k", Ok("second".to_string())).await;

        assert_eq!(cache.get("k").await.unwrap().unwrap(), "first");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_only_expired_entries() {
        let cache: IdempotencyCache<String> = IdempotencyCache::with_ttl(Duration::from_secs(10));
        cache.set("old", Ok("a".to_string())).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("young", Ok("b".to_string())).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        let reclaimed = cache.sweep().await;

        assert_eq!(reclaimed, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("young").await.is_some());
    }
}
