//! Metrics Module
//!
//! Metric shapes emitted by the metrics middleware and the sinks that
//! receive them.

mod stats;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

pub use stats::{CacheStats, StatsSink};

// == Metric ==
/// One observed store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum Metric {
    Read {
        tier: String,
        namespace: String,
        key: String,
        hit: bool,
        /// Only meaningful on a hit
        stale: bool,
        latency_ms: u64,
    },
    Write {
        tier: String,
        namespace: String,
        key: String,
        latency_ms: u64,
    },
    Remove {
        tier: String,
        namespace: String,
        key: String,
        latency_ms: u64,
    },
}

// == Metrics Sink ==
/// Destination for metrics.
///
/// `emit` is fire-and-forget from the cache's point of view: it returns
/// nothing and implementations must not panic on delivery failure.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn emit(&self, metric: Metric);

    /// Delivers anything buffered.
    async fn flush(&self) {}
}

// == Log Sink ==
/// Writes every metric as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    fn emit(&self, metric: Metric) {
        match serde_json::to_string(&metric) {
            Ok(json) => info!(target: "swr_cache::metrics", "{}", json),
            Err(err) => info!(target: "swr_cache::metrics", error = %err, "unserializable metric"),
        }
    }
}
