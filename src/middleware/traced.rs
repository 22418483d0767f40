//! Tracing middleware: one `tracing` span per store operation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, field, info_span, Instrument, Span};

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::middleware::read_outcome;
use crate::store::{SharedStore, Store, StoredEntry};

// == Traced Store ==
pub struct TracedStore {
    inner: SharedStore,
    clock: Arc<dyn Clock>,
}

impl TracedStore {
    pub fn new(inner: SharedStore) -> Self {
        Self::with_clock(inner, Arc::new(SystemClock))
    }

    /// Clock used to annotate hits as stale.
    pub fn with_clock(inner: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { inner, clock }
    }
}

fn record_error(span: &Span, err: &CacheError) {
    span.record("error", field::display(err));
    span.in_scope(|| error!(tier = %err.tier, key = %err.key, "{}", err.message));
}

#[async_trait]
impl Store for TracedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        let span = info_span!(
            "cache.get",
            tier = self.inner.name(),
            namespace,
            key,
            hit = field::Empty,
            stale = field::Empty,
            error = field::Empty,
        );

        let result = self
            .inner
            .get(namespace, key)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(found) => {
                let (hit, stale) = read_outcome(found.as_ref(), self.clock.now_ms());
                span.record("hit", hit);
                if hit {
                    span.record("stale", stale);
                }
            }
            Err(err) => record_error(&span, err),
        }
        result
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let span = info_span!(
            "cache.set",
            tier = self.inner.name(),
            namespace,
            key,
            error = field::Empty,
        );

        let result = self
            .inner
            .set(namespace, key, entry)
            .instrument(span.clone())
            .await;
        if let Err(err) = &result {
            record_error(&span, err);
        }
        result
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let span = info_span!(
            "cache.remove",
            tier = self.inner.name(),
            namespace,
            key,
            error = field::Empty,
        );

        let result = self
            .inner
            .remove(namespace, key)
            .instrument(span.clone())
            .await;
        if let Err(err) = &result {
            record_error(&span, err);
        }
        result
    }
}
