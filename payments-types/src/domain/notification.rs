//! Inbound provider notifications and reconciliation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger::RefundLookup;
use super::payment::{ChargeDetails, PaymentId, PaymentStatus};

/// What a provider notification asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    PaymentProcessing,
    PaymentRequiresAction,
    PaymentSucceeded(ChargeDetails),
    PaymentFailed { code: String, message: String },
    PaymentCanceled,
    RefundSucceeded {
        refund: RefundLookup,
        provider_refund_id: String,
    },
    RefundFailed {
        refund: RefundLookup,
        reason: String,
    },
    /// Acknowledged and deduplicated, but carries no transition.
    Unsupported,
}

impl NotificationKind {
    /// The payment status this notification implies, for payment-level kinds.
    pub fn target_status(&self) -> Option<PaymentStatus> {
        match self {
            NotificationKind::PaymentProcessing => Some(PaymentStatus::Processing),
            NotificationKind::PaymentRequiresAction => Some(PaymentStatus::RequiresAction),
            NotificationKind::PaymentSucceeded(_) => Some(PaymentStatus::Succeeded),
            NotificationKind::PaymentFailed { .. } => Some(PaymentStatus::Failed),
            NotificationKind::PaymentCanceled => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }

    /// Intermediate progress signals, as opposed to settlements.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            NotificationKind::PaymentProcessing | NotificationKind::PaymentRequiresAction
        )
    }
}

/// A provider notification, already authenticated and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderNotification {
    /// Provider-assigned event id; the deduplication key.
    pub event_id: String,
    pub event_type: String,
    /// Payment intent id or provider payment id.
    pub reference: Option<String>,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

/// Outcome of reconciling one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAck {
    Applied,
    NoChange,
    Duplicate,
    UnknownPayment,
    Conflict,
    Ignored,
}

/// A notification the local state machine refused to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConflict {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payment_id: Option<PaymentId>,
    pub local_status: Option<PaymentStatus>,
    pub reason: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
