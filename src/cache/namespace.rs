//! Namespace Cache
//!
//! The per-namespace stale-while-revalidate policy: derives freshness on
//! every read, purges expired entries lazily and drives background refresh
//! for `swr`.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{Entry, Freshness};
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::store::SharedStore;
use crate::tasks::WaitUntil;

// == Lookup ==
/// Result of a namespace `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<V> {
    /// `None` on a miss or an expired entry
    pub value: Option<V>,
    /// Set when the value is stale and should be refreshed
    pub revalidate: bool,
}

impl<V> Lookup<V> {
    pub fn miss() -> Self {
        Self {
            value: None,
            revalidate: false,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

// == TTL ==
/// Fresh and stale durations, in milliseconds, applied on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl {
    pub fresh_ms: u64,
    pub stale_ms: u64,
}

impl Ttl {
    pub fn new(fresh_ms: u64, stale_ms: u64) -> Self {
        Self { fresh_ms, stale_ms }
    }
}

/// Untyped state shared with background tasks.
struct Shared {
    namespace: String,
    store: SharedStore,
    clock: Arc<dyn Clock>,
    background: Arc<dyn WaitUntil>,
    ttl: Ttl,
    /// Keys with a background refresh in flight
    revalidating: Mutex<HashSet<String>>,
}

impl Shared {
    async fn put(&self, key: &str, serialized: String) -> Result<()> {
        let entry = Entry::new(
            serialized,
            self.clock.now_ms(),
            self.ttl.fresh_ms,
            self.ttl.stale_ms,
        );
        self.store.set(&self.namespace, key, entry).await
    }

    fn claim(&self, key: &str) -> bool {
        self.revalidating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }

    fn release(&self, key: &str) {
        self.revalidating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Releases a revalidation claim when dropped, even if the origin panics.
struct Claim {
    shared: Arc<Shared>,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.shared.release(&self.key);
    }
}

fn encode<V: Serialize>(key: &str, value: &V) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CacheError::codec(key, e))
}

// == Namespace Cache ==
/// Typed view over one namespace of the shared store.
pub struct NamespaceCache<V> {
    shared: Arc<Shared>,
    _value: PhantomData<fn() -> V>,
}

impl<V> NamespaceCache<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    // == Constructor ==
    pub fn new(
        namespace: impl Into<String>,
        store: SharedStore,
        clock: Arc<dyn Clock>,
        background: Arc<dyn WaitUntil>,
        ttl: Ttl,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                namespace: namespace.into(),
                store,
                clock,
                background,
                ttl,
                revalidating: Mutex::new(HashSet::new()),
            }),
            _value: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn ttl(&self) -> Ttl {
        self.shared.ttl
    }

    // == Get ==
    /// Reads `key`, classifying the entry by its deadlines.
    ///
    /// Expired entries read as a miss and are removed from the store; a
    /// failed purge is logged, not returned.
    pub async fn get(&self, key: &str) -> Result<Lookup<V>> {
        let shared = &self.shared;
        let Some(entry) = shared.store.get(&shared.namespace, key).await? else {
            return Ok(Lookup::miss());
        };

        let freshness = entry.freshness(shared.clock.now_ms());
        if freshness == Freshness::Expired {
            if let Err(err) = shared.store.remove(&shared.namespace, key).await {
                warn!(namespace = %shared.namespace, key, error = %err, "failed to purge expired entry");
            }
            return Ok(Lookup::miss());
        }

        let value = serde_json::from_str(&entry.value).map_err(|e| CacheError::codec(key, e))?;
        Ok(Lookup {
            value: Some(value),
            revalidate: freshness == Freshness::Stale,
        })
    }

    // == Set ==
    /// Stores `value` as fresh for `fresh_ms` and usable until `stale_ms`.
    pub async fn set(&self, key: &str, value: &V) -> Result<()> {
        let serialized = encode(key, value)?;
        self.shared.put(key, serialized).await
    }

    // == Remove ==
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.shared.store.remove(&self.shared.namespace, key).await
    }

    /// Removes every key, attempting all of them before reporting the first
    /// failure.
    pub async fn remove_many<I, K>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        let removals = keys.iter().map(|key| self.remove(key.as_ref()));
        join_all(removals).await.into_iter().collect()
    }

    // == SWR ==
    /// Pull-through read.
    ///
    /// - fresh hit: returned as is
    /// - stale hit: returned immediately; the origin reload runs on the
    ///   background scheduler and its failure is only logged
    /// - miss: the origin is awaited; its value is returned and written back
    ///   in the background, its failure is returned as a `CacheError`
    /// - store error: returned without calling the origin
    pub async fn swr<F, Fut>(&self, key: &str, load_from_origin: F) -> Result<V>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let lookup = self.get(key).await?;

        if let Some(value) = lookup.value {
            if lookup.revalidate {
                self.revalidate(key, load_from_origin);
            }
            return Ok(value);
        }

        let value = load_from_origin(key.to_string())
            .await
            .map_err(|err| CacheError::origin(key, &err))?;
        self.write_behind(key, &value)?;
        Ok(value)
    }

    /// Schedules an origin reload unless one is already running for `key`.
    fn revalidate<F, Fut>(&self, key: &str, load_from_origin: F)
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        if !self.shared.claim(key) {
            debug!(namespace = %self.shared.namespace, key, "revalidation already in flight");
            return;
        }

        let claim = Claim {
            shared: self.shared.clone(),
            key: key.to_string(),
        };
        let task = async move {
            let shared = claim.shared.clone();
            let key = claim.key.clone();

            let outcome = match load_from_origin(key.clone()).await {
                Ok(value) => match encode(&key, &value) {
                    Ok(serialized) => shared.put(&key, serialized).await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(CacheError::origin(&key, &err)),
            };

            match outcome {
                Ok(()) => debug!(namespace = %shared.namespace, key = %key, "revalidated"),
                Err(err) => {
                    warn!(namespace = %shared.namespace, key = %key, error = %err, "background revalidation failed")
                }
            }
            drop(claim);
        };

        self.shared.background.wait_until(task.boxed());
    }

    /// Writes a freshly loaded value without making the caller wait.
    fn write_behind(&self, key: &str, value: &V) -> Result<()> {
        let serialized = encode(key, value)?;
        let shared = self.shared.clone();
        let key = key.to_string();

        let task = async move {
            if let Err(err) = shared.put(&key, serialized).await {
                warn!(namespace = %shared.namespace, key = %key, error = %err, "write-behind failed");
            }
        };
        self.shared.background.wait_until(task.boxed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, Store, StoredEntry};
    use crate::tasks::BackgroundTasks;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FRESH: u64 = 60_000;
    const STALE: u64 = 120_000;

    struct Harness {
        clock: Arc<ManualClock>,
        memory: MemoryStore,
        tasks: Arc<BackgroundTasks>,
        cache: NamespaceCache<String>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let memory = MemoryStore::with_clock(clock.clone());
        let tasks = Arc::new(BackgroundTasks::new());
        let cache = NamespaceCache::new(
            "test",
            Arc::new(memory.clone()),
            clock.clone(),
            tasks.clone(),
            Ttl::new(FRESH, STALE),
        );
        Harness {
            clock,
            memory,
            tasks,
            cache,
        }
    }

    #[tokio::test]
    async fn test_get_after_set_is_fresh() {
        let h = harness();
        h.cache.set("k", &"v".to_string()).await.unwrap();

        let lookup = h.cache.get("k").await.unwrap();
        assert_eq!(lookup.value.as_deref(), Some("v"));
        assert!(!lookup.revalidate);
    }

    #[tokio::test]
    async fn test_set_respects_deadline_invariant() {
        let h = harness();
        h.clock.set(5_000);
        h.cache.set("k", &"v".to_string()).await.unwrap();

        let raw = h.memory.peek("test", "k").await.unwrap();
        assert_eq!(raw.fresh_until, 65_000);
        assert_eq!(raw.stale_until, 125_000);
        assert!(raw.fresh_until <= raw.stale_until);
    }

    #[tokio::test]
    async fn test_fresh_stale_expired_timeline() {
        let h = harness();
        h.cache.set("k", &"v".to_string()).await.unwrap();

        h.clock.set(30_000);
        let fresh = h.cache.get("k").await.unwrap();
        assert_eq!(fresh.value.as_deref(), Some("v"));
        assert!(!fresh.revalidate);

        h.clock.set(90_000);
        let stale = h.cache.get("k").await.unwrap();
        assert_eq!(stale.value.as_deref(), Some("v"));
        assert!(stale.revalidate);

        h.clock.set(150_000);
        let expired = h.cache.get("k").await.unwrap();
        assert!(expired.value.is_none());
        assert!(h.memory.peek("test", "k").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_remove_many() {
        let h = harness();
        for key in ["a", "b", "c"] {
            h.cache.set(key, &key.to_string()).await.unwrap();
        }

        h.cache.remove("a").await.unwrap();
        h.cache.remove_many(["b", "c", "missing"]).await.unwrap();
        assert!(h.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_swr_cold_loads_once_and_writes_back() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let value = h
            .cache
            .swr("k", move |key| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(format!("origin:{}", key))
            })
            .await
            .unwrap();
        assert_eq!(value, "origin:k");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        h.tasks.drain().await;
        let lookup = h.cache.get("k").await.unwrap();
        assert_eq!(lookup.value.as_deref(), Some("origin:k"));
    }

    #[tokio::test]
    async fn test_swr_fresh_hit_skips_origin() {
        let h = harness();
        h.cache.set("k", &"cached".to_string()).await.unwrap();

        let value = h
            .cache
            .swr("k", |_| async { Err::<String, _>(anyhow::anyhow!("origin must not be called")) })
            .await
            .unwrap();
        assert_eq!(value, "cached");
        assert_eq!(h.tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_swr_stale_returns_without_waiting_for_origin() {
        let h = harness();
        h.cache.set("k", &"old".to_string()).await.unwrap();
        h.clock.set(90_000);

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let value = h
            .cache
            .swr("k", move |_| async move {
                let _ = gate.await;
                anyhow::Ok("new".to_string())
            })
            .await
            .unwrap();

        // Returned while the origin is still blocked on the gate.
        assert_eq!(value, "old");

        release.send(()).unwrap();
        h.tasks.drain().await;

        let lookup = h.cache.get("k").await.unwrap();
        assert_eq!(lookup.value.as_deref(), Some("new"));
        assert!(!lookup.revalidate);
    }

    #[tokio::test]
    async fn test_swr_stale_origin_failure_is_absorbed() {
        let h = harness();
        h.cache.set("k", &"old".to_string()).await.unwrap();
        h.clock.set(90_000);

        let value = h
            .cache
            .swr("k", |_| async { Err::<String, _>(anyhow::anyhow!("origin down")) })
            .await
            .unwrap();
        assert_eq!(value, "old");

        h.tasks.drain().await;
        let lookup = h.cache.get("k").await.unwrap();
        assert_eq!(lookup.value.as_deref(), Some("old"));
        assert!(lookup.revalidate);
    }

    #[tokio::test]
    async fn test_swr_miss_origin_failure_is_surfaced() {
        let h = harness();
        let err = h
            .cache
            .swr("k", |_| async { Err::<String, _>(anyhow::anyhow!("origin down")) })
            .await
            .unwrap_err();
        assert_eq!(err.tier, "origin");
        assert!(err.message.contains("origin down"));
    }

    #[tokio::test]
    async fn test_swr_dedupes_concurrent_revalidations() {
        let h = harness();
        h.cache.set("k", &"old".to_string()).await.unwrap();
        h.clock.set(90_000);

        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let counter = calls.clone();
        h.cache
            .swr("k", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = gate.await;
                anyhow::Ok("new".to_string())
            })
            .await
            .unwrap();

        let counter = calls.clone();
        h.cache
            .swr("k", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok("newer".to_string())
            })
            .await
            .unwrap();

        release.send(()).unwrap();
        h.tasks.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.cache.get("k").await.unwrap().value.as_deref(), Some("new"));
    }

    /// Store whose reads always fail.
    struct Unreachable;

    #[async_trait]
    impl Store for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }
        async fn get(&self, _: &str, key: &str) -> Result<Option<StoredEntry>> {
            Err(CacheError::new("unreachable", key, "timeout"))
        }
        async fn set(&self, _: &str, _: &str, _: StoredEntry) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_swr_store_error_skips_origin() {
        let tasks = Arc::new(BackgroundTasks::new());
        let cache: NamespaceCache<String> = NamespaceCache::new(
            "test",
            Arc::new(Unreachable),
            Arc::new(ManualClock::new(0)),
            tasks,
            Ttl::new(FRESH, STALE),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = cache
            .swr("k", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok("v".to_string())
            })
            .await
            .unwrap_err();

        assert_eq!(err.tier, "unreachable");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mismatched_shape_is_codec_error() {
        let h = harness();
        h.memory
            .set(
                "test",
                "k",
                Entry::new("{\"not\":\"a string\"}".to_string(), 0, FRESH, STALE),
            )
            .await
            .unwrap();

        let err = h.cache.get("k").await.unwrap_err();
        assert_eq!(err.tier, "codec");
    }

    /// Store that hands back whatever it holds, expired or not, and counts
    /// removes.
    struct NoSelfPurge {
        entry: StoredEntry,
        removes: AtomicUsize,
        fail_removes: bool,
    }

    impl NoSelfPurge {
        fn expired_at(now: u64, fail_removes: bool) -> Self {
            Self {
                entry: Entry::new("\"old\"".to_string(), 0, now / 2, now),
                removes: AtomicUsize::new(0),
                fail_removes,
            }
        }
    }

    #[async_trait]
    impl Store for NoSelfPurge {
        fn name(&self) -> &str {
            "no-self-purge"
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<StoredEntry>> {
            Ok(Some(self.entry.clone()))
        }
        async fn set(&self, _: &str, _: &str, _: StoredEntry) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &str, key: &str) -> Result<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            if self.fail_removes {
                return Err(CacheError::new("no-self-purge", key, "remove refused"));
            }
            Ok(())
        }
    }

    fn over(store: Arc<NoSelfPurge>, now: u64) -> NamespaceCache<String> {
        NamespaceCache::new(
            "test",
            store,
            Arc::new(ManualClock::new(now)),
            Arc::new(BackgroundTasks::new()),
            Ttl::new(FRESH, STALE),
        )
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed_once() {
        let store = Arc::new(NoSelfPurge::expired_at(10_000, false));
        let cache = over(store.clone(), 10_000);

        let lookup = cache.get("k").await.unwrap();
        assert_eq!(lookup, Lookup::miss());
        assert_eq!(store.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_expiry_purge_still_reads_as_miss() {
        let store = Arc::new(NoSelfPurge::expired_at(10_000, true));
        let cache = over(store.clone(), 10_000);

        let lookup = cache.get("k").await.unwrap();
        assert_eq!(lookup, Lookup::miss());
        assert_eq!(store.removes.load(Ordering::SeqCst), 1);
    }
}
