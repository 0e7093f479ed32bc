//! Adapter serving a fixed payload, inline or from a JSON file.
//!
//! Used for stubbed third-party feeds, local fixtures and tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{AdapterMetadata, DataAdapter, TtlCache};
use crate::domain::{SourceKind, SourcePayload};
use crate::error::{CourtsideError, Result};

#[derive(Debug, Clone)]
enum FeedSource {
    Inline(SourcePayload),
    File(PathBuf),
}

pub struct StaticFeedAdapter {
    id: String,
    kind: SourceKind,
    source: RwLock<FeedSource>,
    cache: TtlCache<SourcePayload>,
    connected: AtomicBool,
    /// Injected failure reason, for simulating an outage
    failure: RwLock<Option<String>>,
    loads: AtomicU64,
}

impl StaticFeedAdapter {
    /// Serve an inline payload
    pub fn inline(id: &str, payload: SourcePayload, cache_ttl: Duration) -> Self {
        Self::build(id, payload.kind(), FeedSource::Inline(payload), cache_ttl)
    }

    /// Serve a JSON file holding a tagged `SourcePayload`
    pub fn from_file(id: &str, kind: SourceKind, path: PathBuf, cache_ttl: Duration) -> Self {
        Self::build(id, kind, FeedSource::File(path), cache_ttl)
    }

    fn build(id: &str, kind: SourceKind, source: FeedSource, cache_ttl: Duration) -> Self {
        Self {
            id: id.to_string(),
            kind,
            source: RwLock::new(source),
            cache: TtlCache::new(cache_ttl),
            connected: AtomicBool::new(false),
            failure: RwLock::new(None),
            loads: AtomicU64::new(0),
        }
    }

    /// Replace the inline payload and drop the cached copy
    pub async fn set_payload(&self, payload: SourcePayload) -> Result<()> {
        if payload.kind() != self.kind {
            return Err(CourtsideError::Validation(format!(
                "adapter {} serves {}, got {}",
                self.id,
                self.kind,
                payload.kind()
            )));
        }
        *self.source.write().await = FeedSource::Inline(payload);
        self.cache.invalidate().await;
        Ok(())
    }

    /// Make every uncached fetch fail with `reason` (None restores the feed)
    pub async fn set_failure(&self, reason: Option<&str>) {
        *self.failure.write().await = reason.map(str::to_string);
        self.cache.invalidate().await;
    }

    /// Number of uncached loads performed
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    async fn load(&self) -> Result<SourcePayload> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.failure.read().await.clone() {
            return Err(CourtsideError::SourceFetch {
                source_id: self.id.clone(),
                reason,
            });
        }

        let source = self.source.read().await.clone();
        let payload = match source {
            FeedSource::Inline(payload) => payload,
            FeedSource::File(path) => {
                let content = tokio::fs::read_to_string(&path).await?;
                serde_json::from_str::<SourcePayload>(&content)?
            }
        };

        if payload.kind() != self.kind {
            return Err(CourtsideError::SourceFetch {
                source_id: self.id.clone(),
                reason: format!("expected {} payload, got {}", self.kind, payload.kind()),
            });
        }

        debug!(source = %self.id, entities = payload.len(), "static feed loaded");
        Ok(payload)
    }
}

#[async_trait]
impl DataAdapter for StaticFeedAdapter {
    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            id: self.id.clone(),
            kind: self.kind,
        }
    }

    async fn is_available(&self) -> bool {
        if self.failure.read().await.is_some() {
            return false;
        }
        match &*self.source.read().await {
            FeedSource::Inline(_) => true,
            FeedSource::File(path) => tokio::fs::metadata(path).await.is_ok(),
        }
    }

    async fn fetch(&self) -> Result<SourcePayload> {
        self.cache.get_or_try_fetch(|| self.load()).await
    }

    async fn get_data(&self) -> Option<SourcePayload> {
        self.cache.get_any().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}
