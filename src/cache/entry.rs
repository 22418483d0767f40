//! Cache Entry Module
//!
//! The value/staleness envelope wrapping every stored value.

use serde::{Deserialize, Serialize};

// == Freshness ==
/// Derived state of an entry relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `now < fresh_until`: authoritative.
    Fresh,
    /// `fresh_until <= now < stale_until`: usable, needs a background refresh.
    Stale,
    /// `now >= stale_until`: must be treated as absent.
    Expired,
}

// == Entry ==
/// A stored value plus its fresh/stale deadlines (Unix milliseconds).
///
/// Invariant: `fresh_until <= stale_until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry<V> {
    pub value: V,
    pub fresh_until: u64,
    pub stale_until: u64,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates an entry written at `now` with the given fresh and stale
    /// durations.
    ///
    /// A `stale_ms` shorter than `fresh_ms` is raised to `fresh_ms` so the
    /// invariant holds for any input.
    pub fn new(value: V, now: u64, fresh_ms: u64, stale_ms: u64) -> Self {
        let fresh_until = now.saturating_add(fresh_ms);
        let stale_until = now.saturating_add(stale_ms).max(fresh_until);
        Self {
            value,
            fresh_until,
            stale_until,
        }
    }

    // == Freshness ==
    /// Classifies the entry at time `now`.
    pub fn freshness(&self, now: u64) -> Freshness {
        if now < self.fresh_until {
            Freshness::Fresh
        } else if now < self.stale_until {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.stale_until
    }

    /// Remaining lifetime before expiry, in whole seconds rounded up.
    pub fn ttl_remaining_secs(&self, now: u64) -> u64 {
        let remaining_ms = self.stale_until.saturating_sub(now);
        remaining_ms.div_ceil(1000)
    }

    /// Replaces the value while keeping both deadlines.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Entry<U> {
        Entry {
            value: f(self.value),
            fresh_until: self.fresh_until,
            stale_until: self.stale_until,
        }
    }

    /// Fallible variant of [`Entry::map`].
    pub fn try_map<U, E>(self, f: impl FnOnce(V) -> Result<U, E>) -> Result<Entry<U>, E> {
        Ok(Entry {
            value: f(self.value)?,
            fresh_until: self.fresh_until,
            stale_until: self.stale_until,
        })
    }
}
