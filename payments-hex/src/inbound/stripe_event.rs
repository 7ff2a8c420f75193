//! Parses Stripe webhook events into provider notifications.

use serde::Deserialize;
use uuid::Uuid;

use payments_types::{NotificationKind, ProviderNotification, RefundId, RefundLookup};

use crate::outbound::stripe::{PaymentIntentObject, RefundObject};

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid event body: {0}")]
    Body(String),
    #[error("invalid {object} object: {reason}")]
    Object {
        object: &'static str,
        reason: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: serde_json::Value,
}

pub fn parse(body: &[u8]) -> Result<ProviderNotification, EventParseError> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| EventParseError::Body(e.to_string()))?;
    let envelope: Envelope = serde_json::from_value(payload.clone())
        .map_err(|e| EventParseError::Body(e.to_string()))?;
    if envelope.id.trim().is_empty() {
        return Err(EventParseError::Body("event id is empty".into()));
    }

    let (reference, kind) = match envelope.event_type.as_str() {
        t if t.starts_with("payment_intent.") => {
            let intent: PaymentIntentObject = object(envelope.data.object, "payment_intent")?;
            (Some(intent.id.clone()), intent_kind(t, &intent))
        }
        "refund.created" | "refund.updated" | "refund.failed" | "charge.refund.updated" => {
            let refund: RefundObject = object(envelope.data.object, "refund")?;
            let reference = refund.payment_intent.clone().or(refund.charge.clone());
            (reference, refund_kind(&envelope.event_type, refund))
        }
        _ => (None, NotificationKind::Unsupported),
    };

    Ok(ProviderNotification {
        event_id: envelope.id,
        event_type: envelope.event_type,
        reference,
        kind,
        payload,
    })
}

fn object<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    name: &'static str,
) -> Result<T, EventParseError> {
    serde_json::from_value(value).map_err(|e| EventParseError::Object {
        object: name,
        reason: e.to_string(),
    })
}

fn intent_kind(event_type: &str, intent: &PaymentIntentObject) -> NotificationKind {
    match event_type {
        "payment_intent.processing" => NotificationKind::PaymentProcessing,
        "payment_intent.requires_action" => NotificationKind::PaymentRequiresAction,
        "payment_intent.succeeded" => NotificationKind::PaymentSucceeded(intent.charge_details()),
        "payment_intent.payment_failed" => {
            let (code, message) = intent.failure();
            NotificationKind::PaymentFailed { code, message }
        }
        "payment_intent.canceled" => NotificationKind::PaymentCanceled,
        _ => NotificationKind::Unsupported,
    }
}

fn refund_kind(event_type: &str, refund: RefundObject) -> NotificationKind {
    // Our own id travels in metadata; refunds created elsewhere only have theirs.
    let lookup = refund
        .metadata
        .get("refund_id")
        .and_then(|id| id.parse::<Uuid>().ok())
        .map(|id| RefundLookup::Id(RefundId::from_uuid(id)))
        .unwrap_or_else(|| RefundLookup::Provider(refund.id.clone()));

    let status = if event_type == "refund.failed" {
        "failed"
    } else {
        refund.status.as_str()
    };
    match status {
        "succeeded" => NotificationKind::RefundSucceeded {
            refund: lookup,
            provider_refund_id: refund.id,
        },
        "failed" | "canceled" => NotificationKind::RefundFailed {
            refund: lookup,
            reason: refund
                .failure_reason
                .unwrap_or_else(|| status.to_string()),
        },
        _ => NotificationKind::Unsupported,
    }
}
