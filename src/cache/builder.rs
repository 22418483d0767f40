//! Cache Builder
//!
//! Assembles the standard stack from a [`Config`]:
//!
//! ```text
//! Traced( Encrypted?( Tiered[ Metrics(memory), Metrics(edge)? ] ) )
//! ```

use std::sync::Arc;

use tracing::info;

use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::middleware::{EncryptedStore, MetricsStore, TracedStore};
use crate::store::{EdgeStore, MemoryStore, SharedStore, TieredStore};
use crate::tasks::WaitUntil;

// == Cache Builder ==
pub struct CacheBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<dyn MetricsSink>>,
    memory: Option<MemoryStore>,
}

impl CacheBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            metrics: None,
            memory: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wraps every tier with the metrics middleware.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Uses an existing in-process store (and its map) as the first tier.
    pub fn memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    fn measured(&self, store: SharedStore) -> SharedStore {
        match &self.metrics {
            Some(sink) => Arc::new(MetricsStore::new(store, sink.clone(), self.clock.clone())),
            None => store,
        }
    }

    // == Build ==
    pub fn build(self, background: Arc<dyn WaitUntil>) -> Result<Cache> {
        self.config.validate()?;

        let memory = self.memory.clone().unwrap_or_else(|| {
            MemoryStore::with_clock(self.clock.clone())
                .with_max_entries(self.config.memory_max_entries)
        });
        let memory_tier = self.measured(Arc::new(memory));

        let edge_tier = match &self.config.edge {
            Some(edge) => {
                let store = EdgeStore::with_clock(edge.clone(), self.clock.clone())?;
                info!(base_url = %edge.base_url, "edge tier enabled");
                Some(self.measured(Arc::new(store)))
            }
            None => None,
        };

        let mut store: SharedStore = Arc::new(TieredStore::new([Some(memory_tier), edge_tier]));
        if let Some(key) = &self.config.encryption_key {
            store = Arc::new(EncryptedStore::from_base64_key(store, key)?);
            info!("at-rest encryption enabled");
        }
        let store: SharedStore = Arc::new(TracedStore::with_clock(store, self.clock.clone()));

        Ok(Cache::new(store, self.clock, background, self.config.ttl()))
    }
}
