//! Provider notification reconciliation.
//!
//! Each notification is applied at most once: its event id is recorded in
//! the same transaction as the transition it causes. Notifications the
//! local state machine refuses are logged as conflicts and acknowledged, so
//! a terminal local decision is never overridden by an external signal.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use payments_types::ports::MutationOutcome;
use payments_types::{
    AppError, DomainError, DomainEvent, IdempotencyStore, NotificationKind, Payment,
    PaymentRepository, ProviderNotification, ReconciliationConflict, RefundLedger, RepoError,
    WebhookAck,
};

use crate::service::PaymentService;

impl<R: PaymentRepository + IdempotencyStore> PaymentService<R> {
    /// Reconciles one authenticated provider notification.
    ///
    /// Only infrastructure failures are returned as errors; nothing has been
    /// recorded in that case and the provider's retry is processed normally.
    #[tracing::instrument(
        skip(self, notification),
        fields(event_id = %notification.event_id, event_type = %notification.event_type)
    )]
    pub async fn handle_notification(
        &self,
        notification: ProviderNotification,
    ) -> Result<WebhookAck, AppError> {
        if self.repo.is_processed(&notification.event_id).await? {
            tracing::debug!("duplicate notification");
            return Ok(WebhookAck::Duplicate);
        }

        if notification.kind == NotificationKind::Unsupported {
            return self
                .acknowledge(&notification.event_id, WebhookAck::Ignored)
                .await;
        }

        let payment = match notification.reference.as_deref() {
            Some(reference) => self.repo.find_by_provider_reference(reference).await?,
            None => None,
        };
        let Some(payment) = payment else {
            tracing::warn!(reference = ?notification.reference, "notification for unknown payment");
            return self
                .acknowledge(&notification.event_id, WebhookAck::UnknownPayment)
                .await;
        };

        let now = self.clock.now();
        let kind = notification.kind.clone();
        let result = self
            .transition(
                payment.id,
                Some(&notification.event_id),
                Box::new(move |p, ledger| apply_notification(p, ledger, kind, now)),
            )
            .await;

        match result {
            Ok(MutationOutcome::AlreadyProcessed) => Ok(WebhookAck::Duplicate),
            Ok(MutationOutcome::Applied { events, .. }) if events.is_empty() => {
                tracing::debug!(payment_id = %payment.id, "notification matched current state");
                Ok(WebhookAck::NoChange)
            }
            Ok(MutationOutcome::Applied { payment, .. }) => {
                tracing::info!(payment_id = %payment.id, status = %payment.status, "notification applied");
                Ok(WebhookAck::Applied)
            }
            Err(RepoError::Domain(e)) => self.record_conflict(&notification, &payment, e).await,
            Err(RepoError::NotFound) => {
                self.acknowledge(&notification.event_id, WebhookAck::UnknownPayment)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records the event id for a notification that causes no transition.
    async fn acknowledge(&self, event_id: &str, ack: WebhookAck) -> Result<WebhookAck, AppError> {
        if self.repo.mark_processed(event_id).await? {
            Ok(ack)
        } else {
            Ok(WebhookAck::Duplicate)
        }
    }

    async fn record_conflict(
        &self,
        notification: &ProviderNotification,
        payment: &Payment,
        error: DomainError,
    ) -> Result<WebhookAck, AppError> {
        let conflict = ReconciliationConflict {
            id: Uuid::new_v4(),
            event_id: notification.event_id.clone(),
            event_type: notification.event_type.clone(),
            payment_id: Some(payment.id),
            local_status: Some(payment.status),
            reason: error.to_string(),
            payload: notification.payload.clone(),
            created_at: self.clock.now(),
        };
        // The dedup key and the conflict row commit together, so a failed
        // insert leaves the event unprocessed for the provider's retry.
        if !self
            .repo
            .record_conflict(&conflict, Some(&notification.event_id))
            .await?
        {
            return Ok(WebhookAck::Duplicate);
        }

        tracing::warn!(
            payment_id = %payment.id,
            local_status = %payment.status,
            error = %error,
            "reconciliation conflict"
        );
        Ok(WebhookAck::Conflict)
    }
}

/// Translates a notification into state machine calls.
///
/// A notification whose target state the payment already holds is a no-op.
/// Late progress signals (processing, requires action) never move an open
/// payment sideways; against a settled payment they are conflicts.
fn apply_notification(
    payment: &mut Payment,
    ledger: &mut RefundLedger,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> Result<Vec<DomainEvent>, DomainError> {
    if let Some(target) = kind.target_status() {
        if payment.status == target {
            return Ok(Vec::new());
        }
        if kind.is_progress() && payment.status.is_open() {
            let moved = match kind {
                NotificationKind::PaymentProcessing => payment.process(now),
                _ => payment.require_action(now),
            };
            return Ok(moved.map(|e| vec![e]).unwrap_or_default());
        }
    }

    match kind {
        NotificationKind::PaymentProcessing => Ok(vec![payment.process(now)?]),
        NotificationKind::PaymentRequiresAction => Ok(vec![payment.require_action(now)?]),
        NotificationKind::PaymentSucceeded(charge) => Ok(vec![payment.succeed(charge, now)?]),
        NotificationKind::PaymentFailed { code, message } => {
            Ok(vec![payment.fail(&code, &message, now)?])
        }
        NotificationKind::PaymentCanceled => Ok(payment.cancel(now)?.into_iter().collect()),
        NotificationKind::RefundSucceeded {
            refund,
            provider_refund_id,
        } => ledger.confirm(payment, &refund, Some(provider_refund_id), None, now),
        NotificationKind::RefundFailed { refund, reason } => ledger.reject(&refund, &reason, now),
        NotificationKind::Unsupported => Ok(Vec::new()),
    }
}
