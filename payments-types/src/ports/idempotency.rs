//! Idempotency store port.

use crate::error::RepoError;

/// Deduplication table keyed by external event id.
#[async_trait::async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Atomically records `event_id`.
    ///
    /// Returns `true` the first time an id is seen and `false` for a
    /// duplicate. A unique-constraint hit is never an error.
    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepoError>;

    /// Read-only check, used as a fast path before doing any work.
    async fn is_processed(&self, event_id: &str) -> Result<bool, RepoError>;
}
