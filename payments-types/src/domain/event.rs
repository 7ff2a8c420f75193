//! Domain events and their outbox representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::money::Money;
use super::payment::PaymentId;
use super::refund::RefundId;

pub mod topics {
    pub const PAYMENT_INITIATED: &str = "payment.initiated";
    pub const PAYMENT_PROCESSING: &str = "payment.processing";
    pub const PAYMENT_REQUIRES_ACTION: &str = "payment.requires_action";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const PAYMENT_CANCELLED: &str = "payment.cancelled";
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
    pub const REFUND_INITIATED: &str = "refund.initiated";
    pub const REFUND_FAILED: &str = "refund.failed";
}

/// A fact produced by a committed state change.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    PaymentInitiated {
        payment_id: PaymentId,
        order_id: String,
        user_id: String,
        amount: Money,
    },
    PaymentProcessing {
        payment_id: PaymentId,
        order_id: String,
    },
    PaymentRequiresAction {
        payment_id: PaymentId,
        order_id: String,
    },
    PaymentSucceeded {
        payment_id: PaymentId,
        order_id: String,
        amount: Money,
    },
    PaymentFailed {
        payment_id: PaymentId,
        order_id: String,
        code: String,
        message: String,
    },
    PaymentCancelled {
        payment_id: PaymentId,
        order_id: String,
    },
    PaymentRefunded {
        payment_id: PaymentId,
        refund_id: RefundId,
        amount: Money,
        fully_refunded: bool,
    },
    RefundInitiated {
        payment_id: PaymentId,
        refund_id: RefundId,
        amount: Money,
    },
    RefundFailed {
        payment_id: PaymentId,
        refund_id: RefundId,
        reason: String,
    },
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::PaymentInitiated { .. } => topics::PAYMENT_INITIATED,
            DomainEvent::PaymentProcessing { .. } => topics::PAYMENT_PROCESSING,
            DomainEvent::PaymentRequiresAction { .. } => topics::PAYMENT_REQUIRES_ACTION,
            DomainEvent::PaymentSucceeded { .. } => topics::PAYMENT_SUCCEEDED,
            DomainEvent::PaymentFailed { .. } => topics::PAYMENT_FAILED,
            DomainEvent::PaymentCancelled { .. } => topics::PAYMENT_CANCELLED,
            DomainEvent::PaymentRefunded { .. } => topics::PAYMENT_REFUNDED,
            DomainEvent::RefundInitiated { .. } => topics::REFUND_INITIATED,
            DomainEvent::RefundFailed { .. } => topics::REFUND_FAILED,
        }
    }

    pub fn payment_id(&self) -> PaymentId {
        match self {
            DomainEvent::PaymentInitiated { payment_id, .. }
            | DomainEvent::PaymentProcessing { payment_id, .. }
            | DomainEvent::PaymentRequiresAction { payment_id, .. }
            | DomainEvent::PaymentSucceeded { payment_id, .. }
            | DomainEvent::PaymentFailed { payment_id, .. }
            | DomainEvent::PaymentCancelled { payment_id, .. }
            | DomainEvent::PaymentRefunded { payment_id, .. }
            | DomainEvent::RefundInitiated { payment_id, .. }
            | DomainEvent::RefundFailed { payment_id, .. } => *payment_id,
        }
    }

    /// Bus partition key. Every event of one payment shares it.
    pub fn partition_key(&self) -> String {
        self.payment_id().to_string()
    }

    /// JSON payload with camelCase keys.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            DomainEvent::PaymentInitiated {
                payment_id,
                order_id,
                user_id,
                amount,
            } => json!({
                "paymentId": payment_id,
                "orderId": order_id,
                "userId": user_id,
                "amount": amount.amount(),
                "currency": amount.currency(),
            }),
            DomainEvent::PaymentProcessing {
                payment_id,
                order_id,
            }
            | DomainEvent::PaymentRequiresAction {
                payment_id,
                order_id,
            }
            | DomainEvent::PaymentCancelled {
                payment_id,
                order_id,
            } => json!({
                "paymentId": payment_id,
                "orderId": order_id,
            }),
            DomainEvent::PaymentSucceeded {
                payment_id,
                order_id,
                amount,
            } => json!({
                "paymentId": payment_id,
                "orderId": order_id,
                "amount": amount.amount(),
                "currency": amount.currency(),
            }),
            DomainEvent::PaymentFailed {
                payment_id,
                order_id,
                code,
                message,
            } => json!({
                "paymentId": payment_id,
                "orderId": order_id,
                "code": code,
                "message": message,
            }),
            DomainEvent::PaymentRefunded {
                payment_id,
                refund_id,
                amount,
                fully_refunded,
            } => json!({
                "paymentId": payment_id,
                "refundId": refund_id,
                "amount": amount.amount(),
                "currency": amount.currency(),
                "fullyRefunded": fully_refunded,
            }),
            DomainEvent::RefundInitiated {
                payment_id,
                refund_id,
                amount,
            } => json!({
                "paymentId": payment_id,
                "refundId": refund_id,
                "amount": amount.amount(),
                "currency": amount.currency(),
            }),
            DomainEvent::RefundFailed {
                payment_id,
                refund_id,
                reason,
            } => json!({
                "paymentId": payment_id,
                "refundId": refund_id,
                "reason": reason,
            }),
        }
    }

    /// Builds the outbox row to be written alongside the state change.
    pub fn to_outbox(&self, now: DateTime<Utc>) -> NewOutboxEvent {
        NewOutboxEvent {
            event_id: Uuid::new_v4(),
            topic: self.topic().to_string(),
            partition_key: self.partition_key(),
            payload: self.payload(),
            created_at: now,
        }
    }
}

/// An outbox row before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A stored outbox row. `id` is a monotonically increasing sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}
