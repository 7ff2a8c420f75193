//! Per-payment refund ledger.
//!
//! The ledger owns every refund attempt for one payment. Amount validation
//! always goes through [`Payment::authorize_refund`]; the payment's
//! `refunded_amount` only moves when a refund is confirmed.

use chrono::{DateTime, Duration, Utc};

use super::event::DomainEvent;
use super::money::Money;
use super::payment::{Payment, PaymentId};
use super::refund::{Refund, RefundId, RefundReason, RefundStatus};
use crate::error::DomainError;

/// Identifies a refund either by local id or by the provider's refund id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundLookup {
    Id(RefundId),
    Provider(String),
}

/// Input for opening a refund.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub amount: Money,
    pub reason: RefundReason,
    pub notes: Option<String>,
    pub requested_by: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundLedger {
    pub payment_id: PaymentId,
    pub refunds: Vec<Refund>,
}

impl RefundLedger {
    pub fn new(payment_id: PaymentId, refunds: Vec<Refund>) -> Self {
        Self {
            payment_id,
            refunds,
        }
    }

    fn total(&self, payment: &Payment, status: RefundStatus) -> Result<Money, DomainError> {
        self.refunds
            .iter()
            .filter(|r| r.status == status)
            .try_fold(Money::zero(payment.currency()), |acc, r| {
                acc.checked_add(r.amount)
            })
    }

    /// Sum of refunds requested but not yet confirmed or rejected.
    pub fn pending_total(&self, payment: &Payment) -> Result<Money, DomainError> {
        self.total(payment, RefundStatus::Pending)
    }

    /// Sum of confirmed refunds. Always equals `payment.refunded_amount`.
    pub fn succeeded_total(&self, payment: &Payment) -> Result<Money, DomainError> {
        self.total(payment, RefundStatus::Succeeded)
    }

    pub fn find(&self, lookup: &RefundLookup) -> Option<&Refund> {
        self.refunds.iter().find(|r| matches_lookup(r, lookup))
    }

    fn position(&self, lookup: &RefundLookup) -> Result<usize, DomainError> {
        self.refunds
            .iter()
            .position(|r| matches_lookup(r, lookup))
            .ok_or_else(|| DomainError::RefundNotFound(describe(lookup)))
    }

    /// Opens a PENDING refund after the payment's refund guard accepts it.
    pub fn open(
        &mut self,
        payment: &Payment,
        request: RefundRequest,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<(Refund, DomainEvent), DomainError> {
        let reserved = self.pending_total(payment)?;
        payment.authorize_refund(request.amount, reserved, now, window)?;

        let refund = Refund {
            id: RefundId::new(),
            payment_id: payment.id,
            amount: request.amount,
            status: RefundStatus::Pending,
            reason: request.reason,
            notes: request.notes,
            provider_refund_id: None,
            failure_reason: None,
            requested_by: request.requested_by,
            processed_by: None,
            metadata: request.metadata,
            refunded_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.refunds.push(refund.clone());

        let event = DomainEvent::RefundInitiated {
            payment_id: payment.id,
            refund_id: refund.id,
            amount: refund.amount,
        };
        Ok((refund, event))
    }

    /// Records the provider's id for a refund without settling it.
    pub fn attach_provider_id(
        &mut self,
        refund_id: RefundId,
        provider_refund_id: &str,
    ) -> Result<(), DomainError> {
        let idx = self.position(&RefundLookup::Id(refund_id))?;
        self.refunds[idx].provider_refund_id = Some(provider_refund_id.to_string());
        Ok(())
    }

    /// Confirms a refund and applies it to the payment.
    ///
    /// Returns no events when the refund was already confirmed.
    pub fn confirm(
        &mut self,
        payment: &mut Payment,
        lookup: &RefundLookup,
        provider_refund_id: Option<String>,
        processed_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DomainEvent>, DomainError> {
        let idx = self.position(lookup)?;
        let refund = &mut self.refunds[idx];
        if refund.status == RefundStatus::Succeeded {
            return Ok(Vec::new());
        }
        if refund.status == RefundStatus::Failed {
            return Err(DomainError::RefundSettled(refund.id.to_string()));
        }

        let event = payment.apply_refund(refund.amount, refund.id, now)?;
        refund.succeed(provider_refund_id, now)?;
        refund.processed_by = processed_by;
        Ok(vec![event])
    }

    /// Marks a pending refund FAILED. The payment is left untouched since
    /// nothing was applied to it.
    pub fn reject(
        &mut self,
        lookup: &RefundLookup,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DomainEvent>, DomainError> {
        let idx = self.position(lookup)?;
        let refund = &mut self.refunds[idx];
        if refund.status == RefundStatus::Failed {
            return Ok(Vec::new());
        }
        refund.fail(reason, now)?;
        Ok(vec![DomainEvent::RefundFailed {
            payment_id: refund.payment_id,
            refund_id: refund.id,
            reason: reason.to_string(),
        }])
    }
}

fn matches_lookup(refund: &Refund, lookup: &RefundLookup) -> bool {
    match lookup {
        RefundLookup::Id(id) => refund.id == *id,
        RefundLookup::Provider(pid) => refund.provider_refund_id.as_deref() == Some(pid.as_str()),
    }
}

fn describe(lookup: &RefundLookup) -> String {
    match lookup {
        RefundLookup::Id(id) => id.to_string(),
        RefundLookup::Provider(pid) => pid.clone(),
    }
}
