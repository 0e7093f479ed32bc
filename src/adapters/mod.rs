//! Data adapters: one uniform wrapper per external feed.

pub mod cache;
pub mod http_json;
pub mod static_feed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{SourceKind, SourcePayload};
use crate::error::Result;

pub use cache::{TtlCache, DEFAULT_CACHE_TTL_MS};
pub use http_json::{HttpJsonAdapter, HttpJsonConfig};
pub use static_feed::StaticFeedAdapter;

/// Identity of an adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub id: String,
    pub kind: SourceKind,
}

/// Contract every data source implements.
///
/// `fetch` must be safe to call repeatedly: within the adapter's cache TTL
/// it returns the cached payload without touching the network.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    fn metadata(&self) -> AdapterMetadata;

    /// Cheap liveness check, may probe the network
    async fn is_available(&self) -> bool;

    /// Cached payload if fresh, otherwise a real fetch that refreshes the cache
    async fn fetch(&self) -> Result<SourcePayload>;

    /// Last cached payload without forcing a fetch
    async fn get_data(&self) -> Option<SourcePayload>;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
