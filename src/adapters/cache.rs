//! Single-value TTL cache owned by each adapter.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::Result;

/// Default adapter cache TTL (5 minutes)
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;

#[derive(Debug, Clone)]
struct CacheSlot<T> {
    value: T,
    fetched_at: Instant,
}

/// Caches the last fetched value for `ttl`.
///
/// Concurrent callers of `get_or_try_fetch` share one in-flight fetch.
#[derive(Debug)]
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    slot: RwLock<Option<CacheSlot<T>>>,
    fetch_lock: Mutex<()>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn from_millis(ttl_ms: u64) -> Self {
        Self::new(Duration::from_millis(ttl_ms))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if younger than the TTL
    pub async fn get_fresh(&self) -> Option<T> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
            .map(|s| s.value.clone())
    }

    /// Last cached value regardless of age
    pub async fn get_any(&self) -> Option<T> {
        self.slot.read().await.as_ref().map(|s| s.value.clone())
    }

    pub async fn put(&self, value: T) {
        *self.slot.write().await = Some(CacheSlot {
            value,
            fetched_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    /// Return the fresh value or run `fetch` and cache its result.
    ///
    /// A failed fetch leaves the previous value in place.
    pub async fn get_or_try_fetch<F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get_fresh().await {
            return Ok(value);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(value) = self.get_fresh().await {
            return Ok(value);
        }

        let value = fetch().await?;
        self.put(value.clone()).await;
        Ok(value)
    }
}
