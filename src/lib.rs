//! SWR Cache - A multi-tier stale-while-revalidate cache
//!
//! Serves cached values immediately, refreshes stale ones in the background
//! and fans storage out over ordered tiers with pluggable middleware.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod store;
pub mod tasks;

pub use cache::{Cache, CacheBuilder, Entry, Lookup, Namespace, NamespaceCache, Ttl};
pub use config::Config;
pub use error::{CacheError, Result};
pub use store::{SharedStore, Store};
pub use tasks::{BackgroundTasks, WaitUntil};
