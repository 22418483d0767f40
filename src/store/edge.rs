//! Edge Store
//!
//! A CDN-backed tier. Each `(namespace, key)` maps to a synthetic URL that
//! carries a cache-buster token; entries travel as JSON with a
//! `Cache-Control: max-age` matching their remaining lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::store::{composite_key, Store, StoredEntry};

const TIER_NAME: &str = "edge";

// == Edge Store Config ==
#[derive(Debug, Clone)]
pub struct EdgeStoreConfig {
    /// Root under which entry URLs are synthesized
    pub base_url: String,
    /// Control-plane endpoint accepting `{"files": [url]}` purge requests
    pub purge_url: String,
    /// Bearer token for the purge endpoint
    pub api_token: Option<String>,
    /// Bumping this token orphans every previously written entry
    pub cache_buster: String,
    /// Per-request I/O timeout
    pub timeout: Duration,
}

impl EdgeStoreConfig {
    pub fn new(base_url: impl Into<String>, purge_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            purge_url: purge_url.into(),
            api_token: None,
            cache_buster: "v1".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

// == Edge Store ==
#[derive(Clone)]
pub struct EdgeStore {
    client: Client,
    config: EdgeStoreConfig,
    clock: Arc<dyn Clock>,
}

impl EdgeStore {
    // == Constructor ==
    pub fn new(config: EdgeStoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EdgeStoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        // Validate once up front so per-call URL building only fails on bad keys.
        Url::parse(&config.base_url).map_err(|e| {
            CacheError::new(TIER_NAME, "", format!("invalid base url: {}", e))
        })?;
        // Every remove purges the CDN; there is no evict-only mode.
        if config.purge_url.trim().is_empty() {
            return Err(CacheError::new(TIER_NAME, "", "purge url is required"));
        }
        Url::parse(&config.purge_url).map_err(|e| {
            CacheError::new(TIER_NAME, "", format!("invalid purge url: {}", e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CacheError::new(TIER_NAME, "", format!("http client: {}", e)))?;

        Ok(Self {
            client,
            config,
            clock,
        })
    }

    // == URL ==
    /// Synthetic URL for an entry: `{base}/{namespace}/{key}?v={buster}`.
    pub fn entry_url(&self, namespace: &str, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| self.error(namespace, key, format!("invalid base url: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| self.error(namespace, key, "base url cannot be a base"))?;
            segments.pop_if_empty().push(namespace).push(key);
        }
        url.query_pairs_mut()
            .append_pair("v", &self.config.cache_buster);
        Ok(url)
    }

    fn error(&self, namespace: &str, key: &str, message: impl Into<String>) -> CacheError {
        CacheError::new(TIER_NAME, composite_key(namespace, key), message)
    }

    async fn evict(&self, namespace: &str, key: &str, url: Url) -> Result<()> {
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| self.error(namespace, key, format!("evict: {}", e)))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(self.error(namespace, key, format!("evict: unexpected status {}", status)))
        }
    }

    async fn purge(&self, namespace: &str, key: &str, url: Url) -> Result<()> {
        let mut request = self
            .client
            .post(&self.config.purge_url)
            .json(&json!({ "files": [url.as_str()] }));
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.error(namespace, key, format!("purge: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.error(
                namespace,
                key,
                format!("purge: unexpected status {}", response.status()),
            ))
        }
    }
}

#[async_trait]
impl Store for EdgeStore {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        let url = self.entry_url(namespace, key)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.error(namespace, key, format!("get: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(self.error(namespace, key, format!("get: unexpected status {}", status)))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.error(namespace, key, format!("get: reading body: {}", e)))?;
        let entry: StoredEntry = serde_json::from_str(&body)
            .map_err(|e| self.error(namespace, key, format!("get: malformed entry: {}", e)))?;

        // The CDN's max-age is rounded to whole seconds; trust the envelope.
        if entry.is_expired(self.clock.now_ms()) {
            debug!(namespace, key, "edge: ignoring expired entry");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let url = self.entry_url(namespace, key)?;
        let max_age = entry.ttl_remaining_secs(self.clock.now_ms());
        let body = serde_json::to_string(&entry)
            .map_err(|e| self.error(namespace, key, format!("set: encoding entry: {}", e)))?;

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, format!("public, max-age={}", max_age))
            .body(body)
            .send()
            .await
            .map_err(|e| self.error(namespace, key, format!("set: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.error(
                namespace,
                key,
                format!("set: unexpected status {}", response.status()),
            ))
        }
    }

    /// Evicts the local edge copy and purges the CDN. Both are attempted;
    /// neither is rolled back if the other fails.
    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let url = self.entry_url(namespace, key)?;
        let (evicted, purged) = tokio::join!(
            self.evict(namespace, key, url.clone()),
            self.purge(namespace, key, url)
        );

        match (evicted, purged) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(evict), Err(purge)) => Err(self.error(
                namespace,
                key,
                format!("{}; {}", evict.message, purge.message),
            )),
        }
    }
}
