//! Cache Module
//!
//! The SWR policy layer: entries, per-namespace caches and the registry
//! that hands them out.

mod builder;
mod entry;
mod namespace;
mod registry;


// Re-export public types
pub use builder::CacheBuilder;
pub use entry::{Entry, Freshness};
pub use namespace::{Lookup, NamespaceCache, Ttl};
pub use registry::{Cache, Namespace};
