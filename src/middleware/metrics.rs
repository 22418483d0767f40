//! Metrics middleware: reports hit/miss, freshness and latency per call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::{Metric, MetricsSink};
use crate::middleware::read_outcome;
use crate::store::{SharedStore, Store, StoredEntry};

// == Metrics Store ==
pub struct MetricsStore {
    inner: SharedStore,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl MetricsStore {
    pub fn new(inner: SharedStore, sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
        Self { inner, sink, clock }
    }

    /// Hands the metric to the sink; a panicking sink never reaches the caller.
    fn emit(&self, metric: Metric) {
        if catch_unwind(AssertUnwindSafe(|| self.sink.emit(metric))).is_err() {
            warn!(tier = self.inner.name(), "metrics sink panicked; metric dropped");
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        let start = Instant::now();
        let result = self.inner.get(namespace, key).await;

        // Errors are neither hits nor misses. An expired entry is a miss.
        if let Ok(found) = &result {
            let (hit, stale) = read_outcome(found.as_ref(), self.clock.now_ms());
            self.emit(Metric::Read {
                tier: self.inner.name().to_string(),
                namespace: namespace.to_string(),
                key: key.to_string(),
                hit,
                stale,
                latency_ms: elapsed_ms(start),
            });
        }
        result
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.set(namespace, key, entry).await;
        self.emit(Metric::Write {
            tier: self.inner.name().to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            latency_ms: elapsed_ms(start),
        });
        result
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.remove(namespace, key).await;
        self.emit(Metric::Remove {
            tier: self.inner.name().to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            latency_ms: elapsed_ms(start),
        });
        result
    }
}
