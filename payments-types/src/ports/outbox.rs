//! Outbox store port, consumed by the relay.

use crate::domain::OutboxEvent;
use crate::error::RepoError;

#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    /// Oldest unpublished rows, ordered by sequence id.
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError>;

    /// Stamps `published_at` on the given rows.
    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError>;

    /// Bumps `attempts` and stores the error on the given rows.
    async fn record_publish_failure(&self, ids: &[i64], error: &str) -> Result<(), RepoError>;
}
