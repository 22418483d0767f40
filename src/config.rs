//! Configuration Module
//!
//! Loads cache tuning and tier settings from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::Ttl;
use crate::error::{CacheError, Result};
use crate::store::EdgeStoreConfig;

/// Cache configuration.
///
/// All values can be configured via environment variables with sensible
/// defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a written value is authoritative, in milliseconds
    pub fresh_ms: u64,
    /// How long a written value stays usable, in milliseconds
    pub stale_ms: u64,
    /// Bound on the in-process tier, 0 for unbounded
    pub memory_max_entries: usize,
    /// Edge tier settings; the tier is omitted when `None`
    pub edge: Option<EdgeStoreConfig>,
    /// Base64 AES-256 key enabling at-rest encryption
    pub encryption_key: Option<String>,
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_FRESH_MS` - Fresh window (default: 60000)
    /// - `CACHE_STALE_MS` - Stale window (default: 300000)
    /// - `CACHE_MEMORY_MAX_ENTRIES` - In-process bound (default: 0, unbounded)
    /// - `CACHE_EDGE_URL` - Edge tier base URL (default: unset, no edge tier)
    /// - `CACHE_EDGE_PURGE_URL` - CDN purge endpoint (required with `CACHE_EDGE_URL`)
    /// - `CACHE_EDGE_TOKEN` - Bearer token for the purge endpoint
    /// - `CACHE_EDGE_BUSTER` - Cache-buster token (default: v1)
    /// - `CACHE_EDGE_TIMEOUT_MS` - Edge request timeout (default: 5000)
    /// - `CACHE_ENCRYPTION_KEY` - Base64 AES-256 key (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let edge = non_empty_var("CACHE_EDGE_URL").map(|base_url| {
            let purge_url = non_empty_var("CACHE_EDGE_PURGE_URL").unwrap_or_default();
            let mut edge = EdgeStoreConfig::new(base_url, purge_url);
            edge.api_token = non_empty_var("CACHE_EDGE_TOKEN");
            if let Some(buster) = non_empty_var("CACHE_EDGE_BUSTER") {
                edge.cache_buster = buster;
            }
            if let Some(ms) = parse_var("CACHE_EDGE_TIMEOUT_MS") {
                edge.timeout = Duration::from_millis(ms);
            }
            edge
        });

        Self {
            fresh_ms: parse_var("CACHE_FRESH_MS").unwrap_or(defaults.fresh_ms),
            stale_ms: parse_var("CACHE_STALE_MS").unwrap_or(defaults.stale_ms),
            memory_max_entries: parse_var("CACHE_MEMORY_MAX_ENTRIES")
                .unwrap_or(defaults.memory_max_entries),
            edge,
            encryption_key: non_empty_var("CACHE_ENCRYPTION_KEY"),
        }
    }

    /// Rejects windows that would break `fresh_until <= stale_until`, and an
    /// edge tier with no purge endpoint.
    pub fn validate(&self) -> Result<()> {
        if self.fresh_ms > self.stale_ms {
            return Err(CacheError::new(
                "config",
                "",
                format!(
                    "fresh window ({}ms) exceeds stale window ({}ms)",
                    self.fresh_ms, self.stale_ms
                ),
            ));
        }
        if let Some(edge) = &self.edge {
            if edge.purge_url.trim().is_empty() {
                return Err(CacheError::new(
                    "config",
                    "",
                    "CACHE_EDGE_PURGE_URL is required when the edge tier is enabled",
                ));
            }
        }
        Ok(())
    }

    pub fn ttl(&self) -> Ttl {
        Ttl::new(self.fresh_ms, self.stale_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fresh_ms: 60_000,
            stale_ms: 300_000,
            memory_max_entries: 0,
            edge: None,
            encryption_key: None,
        }
    }
}
