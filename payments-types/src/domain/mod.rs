//! Domain models for the payment engine.

pub mod event;
pub mod ledger;
pub mod money;
pub mod notification;
pub mod payment;
pub mod refund;

pub use event::{topics, DomainEvent, NewOutboxEvent, OutboxEvent};
pub use ledger::{RefundLedger, RefundLookup, RefundRequest};
pub use money::{Currency, Money};
pub use notification::{NotificationKind, ProviderNotification, ReconciliationConflict, WebhookAck};
pub use payment::{
    CardDetails, ChargeDetails, NewPayment, Payment, PaymentId, PaymentMethod, PaymentStatus,
    ProviderKind, MAX_PAYMENT_AMOUNT, MIN_PAYMENT_AMOUNT,
};
pub use refund::{Refund, RefundId, RefundReason, RefundStatus};
