//! Message bus port.

/// A message handed to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Unique message id; consumers deduplicate on it.
    pub id: String,
    pub topic: String,
    /// Partition key. Messages sharing a key are delivered in publish order.
    pub key: String,
    pub payload: Vec<u8>,
}

/// Errors that can occur when publishing.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to publish message: {0}")]
    Publish(String),

    /// A batch was cut short. The first `acked` messages were acknowledged.
    #[error("batch partially published ({acked} acknowledged): {reason}")]
    Partial { acked: usize, reason: String },
}

impl BusError {
    /// Number of leading messages acknowledged before the failure.
    pub fn acked(&self) -> usize {
        match self {
            BusError::Partial { acked, .. } => *acked,
            _ => 0,
        }
    }
}

#[async_trait::async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes one message and waits for the broker acknowledgement.
    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    /// Publishes messages of one topic in order. Returns only after every
    /// message is acknowledged; on failure reports how many were.
    async fn publish_batch(&self, topic: &str, messages: Vec<BusMessage>) -> Result<(), BusError>;
}
