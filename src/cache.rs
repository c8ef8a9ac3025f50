//! The invalidation signal the engine sends to the read-through response
//! cache.
//!
//! The cache itself lives with the route layer; the engine only needs to tell
//! it to drop stale reads after money has moved or configuration has changed.

/// Receives cache invalidation signals from the reconciliation engine.
pub trait CacheInvalidator: Send + Sync {
    /// Drop every cached read so the next UI request sees fresh balances.
    fn invalidate_all(&self);
}

/// A [CacheInvalidator] that only records the signal in the log.
///
/// Used by the daemon, which serves no reads of its own.
#[derive(Debug, Default)]
pub struct LoggingCacheInvalidator;

impl CacheInvalidator for LoggingCacheInvalidator {
    fn invalidate_all(&self) {
        tracing::debug!("clearing the read cache");
    }
}
