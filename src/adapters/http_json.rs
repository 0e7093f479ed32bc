//! Generic HTTP adapter for feeds that serve one JSON document.
//!
//! The response body is the payload without its `kind` tag, e.g.
//! `{"games": [...]}` for an odds feed; the tag is taken from config.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AdapterMetadata, DataAdapter, TtlCache, DEFAULT_CACHE_TTL_MS};
use crate::domain::{SourceKind, SourcePayload};
use crate::error::{CourtsideError, Result};

/// Header carrying the configured API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP adapter configuration
#[derive(Debug, Clone)]
pub struct HttpJsonConfig {
    pub id: String,
    pub kind: SourceKind,
    pub url: String,
    /// Optional API key sent in the `x-api-key` header
    pub api_key: Option<String>,
    pub cache_ttl_ms: u64,
    pub request_timeout_ms: u64,
}

impl HttpJsonConfig {
    pub fn new(id: &str, kind: SourceKind, url: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            url: url.to_string(),
            api_key: None,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            request_timeout_ms: 5_000,
        }
    }
}

pub struct HttpJsonAdapter {
    client: Client,
    config: HttpJsonConfig,
    cache: TtlCache<SourcePayload>,
    connected: AtomicBool,
}

impl HttpJsonAdapter {
    pub fn new(config: HttpJsonConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(CourtsideError::Validation(format!(
                "source {} has no url",
                config.id
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            cache: TtlCache::from_millis(config.cache_ttl_ms),
            config,
            connected: AtomicBool::new(false),
        })
    }

    fn build_request(&self) -> reqwest::RequestBuilder {
        let request = self.client.get(&self.config.url);
        match &self.config.api_key {
            Some(key) => request.header(API_KEY_HEADER, key.as_str()),
            None => request,
        }
    }

    async fn request(&self) -> Result<SourcePayload> {
        debug!(source = %self.config.id, url = %self.config.url, "fetching feed");

        let response = self.build_request().send().await?;
        if !response.status().is_success() {
            return Err(CourtsideError::SourceFetch {
                source_id: self.config.id.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: serde_json::Value = response.json().await?;
        decode_payload(self.config.kind, body)
    }
}

/// Attach the configured kind tag and decode the body
pub(crate) fn decode_payload(kind: SourceKind, body: serde_json::Value) -> Result<SourcePayload> {
    let serde_json::Value::Object(mut fields) = body else {
        return Err(CourtsideError::Validation(format!(
            "{kind} feed body is not a JSON object"
        )));
    };
    fields.insert(
        "kind".to_string(),
        serde_json::Value::String(kind.as_str().to_string()),
    );
    Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
}

#[async_trait]
impl DataAdapter for HttpJsonAdapter {
    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            id: self.config.id.clone(),
            kind: self.config.kind,
        }
    }

    async fn is_available(&self) -> bool {
        match self.client.head(&self.config.url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                warn!(source = %self.config.id, "availability probe failed: {}", e);
                false
            }
        }
    }

    async fn fetch(&self) -> Result<SourcePayload> {
        self.cache.get_or_try_fetch(|| self.request()).await
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
