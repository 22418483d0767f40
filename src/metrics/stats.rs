//! Cache Statistics Module
//!
//! A metrics sink that aggregates emitted metrics into counters.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use crate::metrics::{Metric, MetricsSink};

// == Cache Stats ==
/// Aggregated counters across every observed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found an entry
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Hits that were still fresh
    pub fresh_hits: u64,
    /// Hits that were stale
    pub stale_hits: u64,
    pub writes: u64,
    pub removes: u64,
    /// Sum of all observed latencies
    pub total_latency_ms: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing was read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn record(&mut self, metric: &Metric) {
        match metric {
            Metric::Read {
                hit,
                stale,
                latency_ms,
                ..
            } => {
                if *hit {
                    self.hits += 1;
                    if *stale {
                        self.stale_hits += 1;
                    } else {
                        self.fresh_hits += 1;
                    }
                } else {
                    self.misses += 1;
                }
                self.total_latency_ms += latency_ms;
            }
            Metric::Write { latency_ms, .. } => {
                self.writes += 1;
                self.total_latency_ms += latency_ms;
            }
            Metric::Remove { latency_ms, .. } => {
                self.removes += 1;
                self.total_latency_ms += latency_ms;
            }
        }
    }
}

// == Stats Sink ==
/// In-memory sink producing [`CacheStats`] snapshots.
#[derive(Debug, Default)]
pub struct StatsSink {
    stats: Mutex<CacheStats>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current counters.
    pub fn snapshot(&self) -> CacheStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MetricsSink for StatsSink {
    fn emit(&self, metric: Metric) {
        // A poisoned lock still holds valid counters.
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&metric);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn read(hit: bool, stale: bool) -> Metric {
        Metric::Read {
            tier: "memory".to_string(),
            namespace: "ns".to_string(),
            key: "k".to_string(),
            hit,
            stale,
            latency_ms: 2,
        }
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_reads_are_classified() {
        let sink = StatsSink::new();
        sink.emit(read(true, false));
        sink.emit(read(true, true));
        sink.emit(read(false, false));

        let stats = sink.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.fresh_hits, 1);
        assert_eq!(stats.stale_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_latency_ms, 6);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_writes_and_removes_are_counted() {
        let sink = StatsSink::new();
        sink.emit(Metric::Write {
            tier: "memory".to_string(),
            namespace: "ns".to_string(),
            key: "k".to_string(),
            latency_ms: 1,
        });
        sink.emit(Metric::Remove {
            tier: "memory".to_string(),
            namespace: "ns".to_string(),
            key: "k".to_string(),
            latency_ms: 1,
        });

        let stats = sink.snapshot();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.removes, 1);
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
