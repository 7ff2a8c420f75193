//! NATS JetStream implementation of the message bus.

use async_nats::jetstream;
use async_trait::async_trait;

use payments_types::ports::{BusError, BusMessage, MessageBus};

/// Publishes to JetStream on subject `<topic>.<key>` and waits for the
/// stream's acknowledgement. The message id travels in `Nats-Msg-Id`, so
/// the server drops redeliveries inside its duplicate window.
#[derive(Clone)]
pub struct NatsBus {
    jetstream: jetstream::Context,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Creates the stream capturing `subjects` unless it already exists.
    pub async fn ensure_stream(&self, name: &str, subjects: Vec<String>) -> Result<(), BusError> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: name.to_string(),
                subjects,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(())
    }

    fn subject(message: &BusMessage) -> String {
        format!("{}.{}", message.topic, message.key)
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, message.id.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(Self::subject(&message), headers, message.payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        ack.await.map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn publish_batch(&self, topic: &str, messages: Vec<BusMessage>) -> Result<(), BusError> {
        // Each ack is awaited before the next send so an acked prefix is exact.
        for (acked, message) in messages.into_iter().enumerate() {
            if let Err(e) = self.publish(message).await {
                tracing::debug!(topic, acked, "batch interrupted");
                return Err(BusError::Partial {
                    acked,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}
