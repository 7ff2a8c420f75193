//! In-memory message bus for tests and development.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use payments_types::ports::{BusError, BusMessage, MessageBus};

/// Records every acknowledged message in publish order.
///
/// A failure can be armed with [`InMemoryBus::fail_after`]: each batch then
/// acknowledges at most that many messages before failing.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    published: Arc<Mutex<Vec<BusMessage>>>,
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (`Some`) or clears (`None`) failure injection.
    pub async fn fail_after(&self, acked: Option<usize>) {
        *self.fail_after.lock().await = acked;
    }

    pub async fn messages(&self) -> Vec<BusMessage> {
        self.published.lock().await.clone()
    }

    pub async fn messages_for(&self, topic: &str) -> Vec<BusMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        if *self.fail_after.lock().await == Some(0) {
            return Err(BusError::Publish("injected failure".into()));
        }
        self.published.lock().await.push(message);
        Ok(())
    }

    async fn publish_batch(&self, topic: &str, messages: Vec<BusMessage>) -> Result<(), BusError> {
        let limit = *self.fail_after.lock().await;
        let mut published = self.published.lock().await;

        for (acked, message) in messages.into_iter().enumerate() {
            if limit.is_some_and(|limit| acked >= limit) {
                return Err(BusError::Partial {
                    acked,
                    reason: format!("injected failure on {}", topic),
                });
            }
            published.push(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> BusMessage {
        BusMessage {
            id: id.into(),
            topic: "payment.succeeded".into(),
            key: "k".into(),
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_partial_batch_reports_acked_prefix() {
        let bus = InMemoryBus::new();
        bus.fail_after(Some(1)).await;

        let err = bus
            .publish_batch("payment.succeeded", vec![msg("a"), msg("b"), msg("c")])
            .await
            .unwrap_err();
        assert_eq!(err.acked(), 1);
        assert_eq!(bus.messages().await, vec![msg("a")]);

        bus.fail_after(None).await;
        bus.publish_batch("payment.succeeded", vec![msg("b")])
            .await
            .unwrap();
        assert_eq!(bus.messages_for("payment.succeeded").await.len(), 2);
    }
}
