//! Error types for the cache engine
//!
//! Every failure is a single `CacheError` naming the tier and key it came
//! from. Misses are never errors.

use thiserror::Error;

// == Cache Error ==
/// Unified, non-retryable cache failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{tier}] {key}: {message}")]
pub struct CacheError {
    /// Name of the store, wrapper or layer that failed
    pub tier: String,
    /// Key the operation was addressing
    pub key: String,
    /// Human-readable cause
    pub message: String,
}

impl CacheError {
    // == Constructor ==
    /// Creates a new CacheError.
    pub fn new(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Serialization or deserialization failure for a cached value.
    pub fn codec(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::new("codec", key, err.to_string())
    }

    /// Origin loader failure on the miss path.
    pub fn origin(key: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::new("origin", key, format!("{:#}", err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
