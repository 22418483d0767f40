//! In-Process Store
//!
//! A single shared map keyed by `namespace:key`, with lazy expiry on read
//! and optional LRU bounding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::{composite_key, LruTracker, Store, StoredEntry};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, StoredEntry>,
    lru: LruTracker,
}

// == Memory Store ==
/// In-process store. Clones share the same backing map.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
    /// 0 means unbounded
    max_entries: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    // == Constructors ==
    /// Unbounded store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
            max_entries: 0,
        }
    }

    /// Bounds the store; the least recently used key is evicted on overflow.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    // == Inspection ==
    /// Reads the raw slot without applying expiry.
    pub async fn peek(&self, namespace: &str, key: &str) -> Option<StoredEntry> {
        let state = self.state.read().await;
        state.entries.get(&composite_key(namespace, key)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        let id = composite_key(namespace, key);
        let now = self.clock.now_ms();

        // Write lock: a read can purge the slot and always touches the LRU.
        let mut state = self.state.write().await;
        let expired = match state.entries.get(&id) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.entries.remove(&id);
            state.lru.remove(&id);
            debug!(key = %id, "memory: purged expired entry");
            return Ok(None);
        }

        state.lru.touch(&id);
        Ok(state.entries.get(&id).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let id = composite_key(namespace, key);
        let mut state = self.state.write().await;

        if self.max_entries > 0 && !state.entries.contains_key(&id) {
            while state.entries.len() >= self.max_entries {
                match state.lru.evict_oldest() {
                    Some(evicted) => {
                        state.entries.remove(&evicted);
                        debug!(key = %evicted, "memory: evicted least recently used entry");
                    }
                    None => break,
                }
            }
        }

        state.entries.insert(id.clone(), entry);
        state.lru.touch(&id);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let id = composite_key(namespace, key);
        let mut state = self.state.write().await;
        state.entries.remove(&id);
        state.lru.remove(&id);
        Ok(())
    }
}
