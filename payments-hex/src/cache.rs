//! Cache-aside layer for payment reads.
//!
//! Entries are written only on a read miss and deleted after every
//! mutation. The cache is never authoritative: any failure talking to it is
//! logged and treated as a miss.
//!
//! Every invalidation also rotates a fence token stored next to each key. A
//! read-through compares the token before the store read with the token
//! after its write, and drops its own entry when they differ, so a snapshot
//! loaded before a commit cannot outlive that commit's invalidation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use payments_types::ports::CacheStore;
use payments_types::{Payment, PaymentId};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct PaymentCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl PaymentCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn id_key(id: PaymentId) -> String {
        format!("payment:id:{}", id)
    }

    pub fn order_key(order_id: &str) -> String {
        format!("payment:order:{}", order_id)
    }

    /// Looks up a cached payment. Errors and undecodable entries are misses.
    pub async fn get(&self, key: &str) -> Option<Payment> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(payment) => {
                tracing::debug!(key, "cache hit");
                Some(payment)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    fn fence_key(key: &str) -> String {
        format!("fence:{}", key)
    }

    async fn fence(&self, key: &str) -> Option<String> {
        match self.store.get(&Self::fence_key(key)).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache fence read failed");
                None
            }
        }
    }

    /// Returns the cached payment under `key`, or runs `load` and caches its
    /// result unless an invalidation raced with it.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, load: F) -> Result<Payment, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payment, E>>,
    {
        if let Some(payment) = self.get(key).await {
            return Ok(payment);
        }

        let before = self.fence(key).await;
        let payment = load().await?;
        self.put(key, &payment).await;

        if self.fence(key).await != before {
            tracing::debug!(key, "invalidated during load, dropping entry");
            if let Err(e) = self.store.delete(&[key.to_string()]).await {
                tracing::warn!(key, error = %e, "cache delete failed");
            }
        }
        Ok(payment)
    }

    async fn put(&self, key: &str, payment: &Payment) {
        let raw = match serde_json::to_string(payment) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode payment for cache");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw, self.ttl).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Deletes every key that can hold `payment`.
    ///
    /// Fences are rotated before the delete.
    pub async fn invalidate(&self, payment: &Payment) {
        let keys = [
            Self::id_key(payment.id),
            Self::order_key(&payment.order_id),
        ];
        let token = Uuid::new_v4().to_string();
        for key in &keys {
            if let Err(e) = self
                .store
                .set(&Self::fence_key(key), &token, self.ttl)
                .await
            {
                tracing::warn!(key, error = %e, "cache fence write failed");
            }
        }
        if let Err(e) = self.store.delete(&keys).await {
            tracing::warn!(payment_id = %payment.id, error = %e, "cache invalidation failed");
        }
    }
}
