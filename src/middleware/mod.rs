//! Middleware Module
//!
//! Decorators over [`Store`](crate::store::Store). Each wrapper owns the
//! store it wraps and implements the same contract, so wrappers nest in any
//! order and any number:
//!
//! ```ignore
//! let encrypted = Arc::new(EncryptedStore::from_base64_key(memory, &key)?);
//! let measured = Arc::new(MetricsStore::new(encrypted, sink, clock));
//! let store = TracedStore::new(measured);
//! ```

use crate::cache::Freshness;
use crate::store::StoredEntry;

mod encryption;
mod metrics;
mod traced;

pub use encryption::EncryptedStore;
pub use metrics::MetricsStore;
pub use traced::TracedStore;

/// Classifies a successful read as `(hit, stale)`. An expired entry is a
/// miss, matching what the namespace layer serves.
pub(crate) fn read_outcome(found: Option<&StoredEntry>, now: u64) -> (bool, bool) {
    match found.map(|entry| entry.freshness(now)) {
        Some(Freshness::Fresh) => (true, false),
        Some(Freshness::Stale) => (true, true),
        Some(Freshness::Expired) | None => (false, false),
    }
}
