//! Tiered Store
//!
//! Fans one logical store out over an ordered list of physical stores:
//! reads go near-to-far with fill-down, writes and removes go to every tier.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::store::{SharedStore, Store, StoredEntry};

const TIER_NAME: &str = "tiered";

// == Tiered Store ==
#[derive(Clone, Default)]
pub struct TieredStore {
    tiers: Vec<SharedStore>,
}

impl TieredStore {
    // == Constructor ==
    /// Builds the chain from nearest to farthest, skipping `None` slots so a
    /// caller can include a tier conditionally.
    pub fn new<I>(tiers: I) -> Self
    where
        I: IntoIterator<Item = Option<SharedStore>>,
    {
        Self {
            tiers: tiers.into_iter().flatten().collect(),
        }
    }

    pub fn tiers(&self) -> &[SharedStore] {
        &self.tiers
    }

    /// Writes `entry` into every tier nearer than `hit_index`. Failures are
    /// logged and dropped: the read already succeeded.
    async fn fill_down(&self, hit_index: usize, namespace: &str, key: &str, entry: &StoredEntry) {
        let writes = self.tiers[..hit_index]
            .iter()
            .map(|tier| tier.set(namespace, key, entry.clone()));

        for result in join_all(writes).await {
            if let Err(err) = result {
                warn!(namespace, key, error = %err, "tiered: read-repair failed");
            }
        }
    }

    /// Joins per-tier results into a single error naming this store.
    fn aggregate(key: &str, op: &str, results: Vec<Result<()>>) -> Result<()> {
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err())
            .map(|e| e.to_string())
            .collect();

        if failures.is_empty() {
            return Ok(());
        }
        Err(CacheError::new(
            TIER_NAME,
            key,
            format!("{} failed on {} tier(s): {}", op, failures.len(), failures.join("; ")),
        ))
    }
}

#[async_trait]
impl Store for TieredStore {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            // A tier error is not a miss: surface it instead of falling through.
            let Some(entry) = tier.get(namespace, key).await? else {
                continue;
            };

            if index > 0 {
                debug!(namespace, key, tier = tier.name(), "tiered: hit below first tier, filling down");
                self.fill_down(index, namespace, key, &entry).await;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    async fn set(&self, namespace: &str, key: &str, entry: StoredEntry) -> Result<()> {
        let writes = self
            .tiers
            .iter()
            .map(|tier| tier.set(namespace, key, entry.clone()));
        Self::aggregate(key, "set", join_all(writes).await)
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let removals = self.tiers.iter().map(|tier| tier.remove(namespace, key));
        Self::aggregate(key, "remove", join_all(removals).await)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Entry;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Store that fails every operation.
    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get(&self, _: &str, key: &str) -> Result<Option<StoredEntry>> {
            Err(CacheError::new("broken", key, "unreachable"))
        }
        async fn set(&self, _: &str, key: &str, _: StoredEntry) -> Result<()> {
            Err(CacheError::new("broken", key, "unreachable"))
        }
        async fn remove(&self, _: &str, key: &str) -> Result<()> {
            Err(CacheError::new("broken", key, "unreachable"))
        }
    }

    /// Store that always misses and counts reads.
    #[derive(Default)]
    struct CountingMiss {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl Store for CountingMiss {
        fn name(&self) -> &str {
            "counting"
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<StoredEntry>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
        async fn set(&self, _: &str, _: &str, _: StoredEntry) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn entry(v: &str) -> StoredEntry {
        Entry::new(v.to_string(), 0, u64::MAX, u64::MAX)
    }

    #[tokio::test]
    async fn test_no_tiers_is_a_miss() {
        let tiered = TieredStore::new(Vec::<Option<SharedStore>>::new());
        assert!(tiered.get("ns", "k").await.unwrap().is_none());
        tiered.set("ns", "k", entry("v")).await.unwrap();
        tiered.remove("ns", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_repair_fills_faster_tier() {
        let fast = MemoryStore::new();
        let slow = MemoryStore::new();
        slow.set("ns", "k", entry("v")).await.unwrap();

        let tiered = TieredStore::new([
            Some(Arc::new(fast.clone()) as SharedStore),
            Some(Arc::new(slow.clone()) as SharedStore),
        ]);

        let hit = tiered.get("ns", "k").await.unwrap().unwrap();
        assert_eq!(hit.value, "v");
        assert_eq!(fast.peek("ns", "k").await.unwrap().value, "v");
    }

    #[tokio::test]
    async fn test_first_hit_short_circuits() {
        let fast = MemoryStore::new();
        fast.set("ns", "k", entry("v")).await.unwrap();
        let slow = Arc::new(CountingMiss::default());

        let tiered = TieredStore::new([
            Some(Arc::new(fast) as SharedStore),
            Some(slow.clone() as SharedStore),
        ]);

        tiered.get("ns", "k").await.unwrap();
        assert_eq!(slow.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tier_error_propagates_on_get() {
        let slow = MemoryStore::new();
        slow.set("ns", "k", entry("v")).await.unwrap();

        let tiered = TieredStore::new([
            Some(Arc::new(BrokenStore) as SharedStore),
            Some(Arc::new(slow) as SharedStore),
        ]);

        let err = tiered.get("ns", "k").await.unwrap_err();
        assert_eq!(err.tier, "broken");
    }

    #[tokio::test]
    async fn test_read_repair_failure_does_not_fail_get() {
        let slow = MemoryStore::new();
        slow.set("ns", "k", entry("v")).await.unwrap();

        // A tier that misses on read but fails on write.
        struct MissThenFail;
        #[async_trait]
        impl Store for MissThenFail {
            fn name(&self) -> &str {
                "flaky"
            }
            async fn get(&self, _: &str, _: &str) -> Result<Option<StoredEntry>> {
                Ok(None)
            }
            async fn set(&self, _: &str, key: &str, _: StoredEntry) -> Result<()> {
                Err(CacheError::new("flaky", key, "write refused"))
            }
            async fn remove(&self, _: &str, _: &str) -> Result<()> {
                Ok(())
            }
        }

        let tiered = TieredStore::new([
            Some(Arc::new(MissThenFail) as SharedStore),
            Some(Arc::new(slow) as SharedStore),
        ]);

        assert_eq!(tiered.get("ns", "k").await.unwrap().unwrap().value, "v");
    }

    #[tokio::test]
    async fn test_set_and_remove_reach_every_tier() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let tiered = TieredStore::new([
            Some(Arc::new(a.clone()) as SharedStore),
            None,
            Some(Arc::new(b.clone()) as SharedStore),
        ]);
        assert_eq!(tiered.tiers().len(), 2);

        tiered.set("ns", "k", entry("v")).await.unwrap();
        assert!(a.peek("ns", "k").await.is_some());
        assert!(b.peek("ns", "k").await.is_some());

        tiered.remove("ns", "k").await.unwrap();
        assert!(a.peek("ns", "k").await.is_none());
        assert!(b.peek("ns", "k").await.is_none());
    }

    #[tokio::test]
    async fn test_set_failure_is_aggregated() {
        let healthy = MemoryStore::new();
        let tiered = TieredStore::new([
            Some(Arc::new(healthy.clone()) as SharedStore),
            Some(Arc::new(BrokenStore) as SharedStore),
        ]);

        let err = tiered.set("ns", "k", entry("v")).await.unwrap_err();
        assert_eq!(err.tier, "tiered");
        assert!(err.message.contains("1 tier(s)"));
        assert!(err.message.contains("broken"));
        // Not rolled back.
        assert!(healthy.peek("ns", "k").await.is_some());

        let err = tiered.remove("ns", "k").await.unwrap_err();
        assert_eq!(err.tier, "tiered");
    }
}
