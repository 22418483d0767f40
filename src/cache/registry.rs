//! Cache Registry
//!
//! One engine, many namespaces. Each namespace cache is created on first
//! access and memoized for the registry's lifetime; all of them share the
//! same store, clock and background scheduler.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::{NamespaceCache, Ttl};
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::store::SharedStore;
use crate::tasks::WaitUntil;

// == Namespace ==
/// Declares a namespace name and the value type stored under it.
///
/// Usually declared with [`namespace!`](crate::namespace).
pub trait Namespace: 'static {
    const NAME: &'static str;
    type Value: Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// Declares a [`Namespace`] marker type.
///
/// ```ignore
/// swr_cache::namespace!(pub Users, "users", User);
/// let users = cache.namespace::<Users>()?;
/// ```
#[macro_export]
macro_rules! namespace {
    ($vis:vis $marker:ident, $name:literal, $value:ty) => {
        #[derive(Debug, Clone, Copy)]
        $vis struct $marker;

        impl $crate::cache::Namespace for $marker {
            const NAME: &'static str = $name;
            type Value = $value;
        }
    };
}

struct Slot {
    value_type: TypeId,
    cache: Arc<dyn Any + Send + Sync>,
}

// == Cache ==
/// The registry façade.
pub struct Cache {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    background: Arc<dyn WaitUntil>,
    ttl: Ttl,
    overrides: HashMap<String, Ttl>,
    namespaces: Mutex<HashMap<&'static str, Slot>>,
}

impl Cache {
    // == Constructor ==
    pub fn new(
        store: SharedStore,
        clock: Arc<dyn Clock>,
        background: Arc<dyn WaitUntil>,
        ttl: Ttl,
    ) -> Self {
        Self {
            store,
            clock,
            background,
            ttl,
            overrides: HashMap::new(),
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Gives one namespace its own fresh/stale durations.
    pub fn with_namespace_ttl(mut self, namespace: impl Into<String>, ttl: Ttl) -> Self {
        self.overrides.insert(namespace.into(), ttl);
        self
    }

    /// The durations a namespace will be created with.
    pub fn ttl_for(&self, namespace: &str) -> Ttl {
        self.overrides.get(namespace).copied().unwrap_or(self.ttl)
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // == Namespace ==
    /// Returns the cache for `N`, creating it on first access.
    ///
    /// Fails if another declaration already claimed `N::NAME` with a
    /// different value type.
    pub fn namespace<N: Namespace>(&self) -> Result<Arc<NamespaceCache<N::Value>>> {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let value_type = TypeId::of::<N::Value>();
        let slot = namespaces.entry(N::NAME).or_insert_with(|| {
            debug!(namespace = N::NAME, "creating namespace cache");
            let cache: NamespaceCache<N::Value> = NamespaceCache::new(
                N::NAME,
                self.store.clone(),
                self.clock.clone(),
                self.background.clone(),
                self.ttl_for(N::NAME),
            );
            Slot {
                value_type,
                cache: Arc::new(cache),
            }
        });

        if slot.value_type != value_type {
            return Err(CacheError::new(
                "registry",
                N::NAME,
                "namespace already declared with a different value type",
            ));
        }

        slot.cache
            .clone()
            .downcast::<NamespaceCache<N::Value>>()
            .map_err(|_| CacheError::new("registry", N::NAME, "namespace type mismatch"))
    }

    /// Names of the namespaces materialized so far.
    pub fn namespaces(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        names.sort_unstable();
        names
    }
}
