//! Store Module
//!
//! The storage contract every tier, wrapper and backend satisfies, plus the
//! built-in implementations.
//!
//! Stores hold `Entry<String>`: the value is already serialized by the
//! namespace layer, so wrappers (encryption, metrics) and remote backends
//! can treat it as opaque text while the deadlines stay inspectable.

mod edge;
mod lru;
mod memory;
mod tiered;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Entry;
use crate::error::Result;

pub use edge::{EdgeStore, EdgeStoreConfig};
pub use lru::LruTracker;
pub use memory::MemoryStore;
pub use tiered::TieredStore;

/// Serialized form every store persists.
pub type StoredEntry = Entry<String>;

// == Store ==
/// Storage for `(namespace, key)` pairs.
///
/// Absence is a successful `Ok(None)`; `Err` always means the tier itself
/// failed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Identifier used for observability only (e.g. "memory", "edge").
    fn name(&self) -> &str;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>>;

    /// Overwrites unconditionally.
    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()>;

    /// Idempotent: removing an absent key succeeds.
    async fn remove(&self, namespace: &str, key: &str) -> Result<()>;
}

/// Shared handle to any store, wrapper or tier chain.
pub type SharedStore = Arc<dyn Store>;

/// Composite key isolating namespaces that share one physical store.
pub fn composite_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}
