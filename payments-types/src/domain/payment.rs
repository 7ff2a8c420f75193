//! Payment aggregate and its state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::DomainEvent;
use super::money::{Currency, Money};
use super::refund::RefundId;
use crate::error::DomainError;

/// Smallest amount (in minor units) accepted at creation.
pub const MIN_PAYMENT_AMOUNT: i64 = 50;
/// Largest amount (in minor units) accepted at creation.
pub const MAX_PAYMENT_AMOUNT: i64 = 99_999_999;

/// Unique identifier for a Payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random PaymentId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a PaymentId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the UUID value.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Cancelled,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::RequiresAction => "REQUIRES_ACTION",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    /// Statuses from which the provider may still settle the payment.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::RequiresAction
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "REQUIRES_ACTION" => Ok(PaymentStatus::RequiresAction),
            "SUCCEEDED" => Ok(PaymentStatus::Succeeded),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "PARTIALLY_REFUNDED" => Ok(PaymentStatus::PartiallyRefunded),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Paypal,
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::DebitCard => "DEBIT_CARD",
            PaymentMethod::Paypal => "PAYPAL",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::CashOnDelivery => "CASH_ON_DELIVERY",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "DEBIT_CARD" => Ok(PaymentMethod::DebitCard),
            "PAYPAL" => Ok(PaymentMethod::Paypal),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "CASH_ON_DELIVERY" => Ok(PaymentMethod::CashOnDelivery),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment method: {}",
                other
            ))),
        }
    }
}

/// Which external provider handles the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Stripe,
    Paypal,
    Manual,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "STRIPE",
            ProviderKind::Paypal => "PAYPAL",
            ProviderKind::Manual => "MANUAL",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRIPE" => Ok(ProviderKind::Stripe),
            "PAYPAL" => Ok(ProviderKind::Paypal),
            "MANUAL" => Ok(ProviderKind::Manual),
            other => Err(DomainError::ValidationError(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Masked card details reported by the provider on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub last4: String,
    pub brand: String,
    pub exp_month: i32,
    pub exp_year: i32,
}

/// What the provider reports when a charge settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChargeDetails {
    pub provider_payment_id: String,
    pub provider_customer_id: Option<String>,
    pub card: Option<CardDetails>,
    pub receipt_url: Option<String>,
}

impl ChargeDetails {
    pub fn new(provider_payment_id: impl Into<String>) -> Self {
        Self {
            provider_payment_id: provider_payment_id.into(),
            ..Default::default()
        }
    }
}

/// Input for creating a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub user_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub provider: ProviderKind,
    pub payment_intent_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub metadata: serde_json::Value,
}

/// The payment aggregate root.
///
/// Mutated only through the transition methods below. Every successful
/// transition returns exactly one [`DomainEvent`] to be written to the outbox
/// in the same unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: String,
    pub user_id: String,
    pub amount: Money,
    pub refunded_amount: Money,
    pub method: PaymentMethod,
    pub provider: ProviderKind,
    pub status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub card: Option<CardDetails>,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub receipt_url: Option<String>,
    pub metadata: serde_json::Value,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new payment in PENDING.
    ///
    /// # Validation
    /// - Order and user ids cannot be empty
    /// - Amount must lie within [`MIN_PAYMENT_AMOUNT`]..=[`MAX_PAYMENT_AMOUNT`]
    pub fn create(new: NewPayment, now: DateTime<Utc>) -> Result<(Self, DomainEvent), DomainError> {
        if new.order_id.trim().is_empty() {
            return Err(DomainError::ValidationError("orderId is required".into()));
        }
        if new.user_id.trim().is_empty() {
            return Err(DomainError::ValidationError("userId is required".into()));
        }
        let minor = new.amount.amount();
        if !(MIN_PAYMENT_AMOUNT..=MAX_PAYMENT_AMOUNT).contains(&minor) {
            return Err(DomainError::ValidationError(format!(
                "Amount must be between {} and {} minor units",
                MIN_PAYMENT_AMOUNT, MAX_PAYMENT_AMOUNT
            )));
        }

        let currency = new.amount.currency();
        let payment = Self {
            id: PaymentId::new(),
            order_id: new.order_id,
            user_id: new.user_id,
            amount: new.amount,
            refunded_amount: Money::zero(currency),
            method: new.method,
            provider: new.provider,
            status: PaymentStatus::Pending,
            payment_intent_id: new.payment_intent_id,
            provider_payment_id: None,
            provider_customer_id: new.provider_customer_id,
            card: None,
            description: new.description,
            receipt_email: new.receipt_email,
            receipt_url: None,
            metadata: new.metadata,
            failure_code: None,
            failure_message: None,
            paid_at: None,
            failed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        let event = DomainEvent::PaymentInitiated {
            payment_id: payment.id,
            order_id: payment.order_id.clone(),
            user_id: payment.user_id.clone(),
            amount: payment.amount,
        };
        Ok((payment, event))
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// `amount - refunded_amount`.
    pub fn refundable_amount(&self) -> Money {
        self.amount
            .checked_sub(self.refunded_amount)
            .unwrap_or_else(|_| Money::zero(self.currency()))
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            from: self.status,
            action,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────────

    /// PENDING → PROCESSING.
    pub fn process(&mut self, now: DateTime<Utc>) -> Result<DomainEvent, DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid("process"));
        }
        self.status = PaymentStatus::Processing;
        self.touch(now);
        Ok(DomainEvent::PaymentProcessing {
            payment_id: self.id,
            order_id: self.order_id.clone(),
        })
    }

    /// PENDING | PROCESSING → REQUIRES_ACTION.
    pub fn require_action(&mut self, now: DateTime<Utc>) -> Result<DomainEvent, DomainError> {
        if !matches!(
            self.status,
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            return Err(self.invalid("require action for"));
        }
        self.status = PaymentStatus::RequiresAction;
        self.touch(now);
        Ok(DomainEvent::PaymentRequiresAction {
            payment_id: self.id,
            order_id: self.order_id.clone(),
        })
    }

    /// Open → SUCCEEDED. Requires a provider payment id.
    pub fn succeed(
        &mut self,
        charge: ChargeDetails,
        now: DateTime<Utc>,
    ) -> Result<DomainEvent, DomainError> {
        if !self.status.is_open() {
            return Err(self.invalid("succeed"));
        }
        if charge.provider_payment_id.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "providerPaymentId is required to succeed a payment".into(),
            ));
        }

        self.status = PaymentStatus::Succeeded;
        self.provider_payment_id = Some(charge.provider_payment_id);
        if charge.provider_customer_id.is_some() {
            self.provider_customer_id = charge.provider_customer_id;
        }
        if charge.card.is_some() {
            self.card = charge.card;
        }
        if charge.receipt_url.is_some() {
            self.receipt_url = charge.receipt_url;
        }
        self.paid_at = Some(now);
        self.touch(now);

        Ok(DomainEvent::PaymentSucceeded {
            payment_id: self.id,
            order_id: self.order_id.clone(),
            amount: self.amount,
        })
    }

    /// Open → FAILED. Requires both a failure code and message.
    pub fn fail(
        &mut self,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<DomainEvent, DomainError> {
        if !self.status.is_open() {
            return Err(self.invalid("fail"));
        }
        if code.trim().is_empty() || message.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "failureCode and failureMessage are required".into(),
            ));
        }

        self.status = PaymentStatus::Failed;
        self.failure_code = Some(code.to_string());
        self.failure_message = Some(message.to_string());
        self.failed_at = Some(now);
        self.touch(now);

        Ok(DomainEvent::PaymentFailed {
            payment_id: self.id,
            order_id: self.order_id.clone(),
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    /// Open → CANCELLED. Returns `None` when already cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Option<DomainEvent>, DomainError> {
        if self.status == PaymentStatus::Cancelled {
            return Ok(None);
        }
        if !self.status.is_open() {
            return Err(self.invalid("cancel"));
        }

        self.status = PaymentStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.touch(now);

        Ok(Some(DomainEvent::PaymentCancelled {
            payment_id: self.id,
            order_id: self.order_id.clone(),
        }))
    }

    /// Checks whether `amount` may be refunded now.
    ///
    /// `reserved` is the sum of refunds requested but not yet confirmed; it
    /// counts against the refundable amount so concurrent requests cannot
    /// jointly exceed the charge.
    pub fn authorize_refund(
        &self,
        amount: Money,
        reserved: Money,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), DomainError> {
        if self.status == PaymentStatus::Refunded {
            return Err(DomainError::RefundExceedsAmount {
                requested: amount.amount(),
                refundable: 0,
            });
        }
        if !self.status.is_refundable() {
            return Err(DomainError::NotRefundable(self.status));
        }
        if amount.is_zero() {
            return Err(DomainError::ValidationError(
                "Refund amount must be positive".into(),
            ));
        }

        let committed = self
            .refunded_amount
            .checked_add(reserved)?
            .checked_add(amount)?;
        if committed.try_cmp(&self.amount)?.is_gt() {
            let available = self.refundable_amount().amount() - reserved.amount();
            return Err(DomainError::RefundExceedsAmount {
                requested: amount.amount(),
                refundable: available.max(0),
            });
        }

        if let Some(paid_at) = self.paid_at {
            if now - paid_at > window {
                return Err(DomainError::RefundWindowExpired {
                    days: window.num_days(),
                });
            }
        }
        Ok(())
    }

    /// Applies a confirmed refund: SUCCEEDED | PARTIALLY_REFUNDED → PARTIALLY_REFUNDED | REFUNDED.
    pub fn apply_refund(
        &mut self,
        amount: Money,
        refund_id: RefundId,
        now: DateTime<Utc>,
    ) -> Result<DomainEvent, DomainError> {
        if !self.status.is_refundable() {
            return Err(DomainError::NotRefundable(self.status));
        }
        let refunded = self.refunded_amount.checked_add(amount)?;
        if refunded.try_cmp(&self.amount)?.is_gt() {
            return Err(DomainError::RefundExceedsAmount {
                requested: amount.amount(),
                refundable: self.refundable_amount().amount(),
            });
        }

        let fully_refunded = refunded == self.amount;
        self.refunded_amount = refunded;
        self.status = if fully_refunded {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.touch(now);

        Ok(DomainEvent::PaymentRefunded {
            payment_id: self.id,
            refund_id,
            amount,
            fully_refunded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD).unwrap()
    }

    fn pending(amount: i64) -> Payment {
        let (payment, _) = Payment::create(
            NewPayment {
                order_id: "order-1".into(),
                user_id: "user-1".into(),
                amount: usd(amount),
                method: PaymentMethod::CreditCard,
                provider: ProviderKind::Stripe,
                payment_intent_id: Some("pi_1".into()),
                provider_customer_id: None,
                description: None,
                receipt_email: None,
                metadata: serde_json::Value::Null,
            },
            now(),
        )
        .unwrap();
        payment
    }

    fn in_status(status: PaymentStatus) -> Payment {
        let mut p = pending(10_000);
        p.status = status;
        if status.is_refundable() || status == PaymentStatus::Refunded {
            p.paid_at = Some(now());
        }
        p
    }

    const ALL: [PaymentStatus; 8] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::RequiresAction,
        PaymentStatus::Succeeded,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::PartiallyRefunded,
        PaymentStatus::Refunded,
    ];

    #[test]
    fn test_create_validates_bounds() {
        let p = pending(10_000);
        assert_eq!(p.status, PaymentStatus::Pending);
        assert_eq!(p.refunded_amount, usd(0));

        let mut new = NewPayment {
            order_id: "o".into(),
            user_id: "u".into(),
            amount: usd(49),
            method: PaymentMethod::CreditCard,
            provider: ProviderKind::Stripe,
            payment_intent_id: None,
            provider_customer_id: None,
            description: None,
            receipt_email: None,
            metadata: serde_json::Value::Null,
        };
        assert!(matches!(
            Payment::create(new.clone(), now()),
            Err(DomainError::ValidationError(_))
        ));
        new.amount = usd(MAX_PAYMENT_AMOUNT + 1);
        assert!(Payment::create(new.clone(), now()).is_err());
        new.amount = usd(MAX_PAYMENT_AMOUNT);
        new.order_id = " ".into();
        assert!(Payment::create(new, now()).is_err());
    }

    #[test]
    fn test_process_only_from_pending() {
        for status in ALL {
            let mut p = in_status(status);
            let result = p.process(now());
            if status == PaymentStatus::Pending {
                assert!(result.is_ok());
                assert_eq!(p.status, PaymentStatus::Processing);
            } else {
                assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
                assert_eq!(p.status, status);
            }
        }
    }

    #[test]
    fn test_require_action_sources() {
        for status in ALL {
            let mut p = in_status(status);
            let ok = matches!(status, PaymentStatus::Pending | PaymentStatus::Processing);
            assert_eq!(p.require_action(now()).is_ok(), ok, "from {}", status);
            if ok {
                assert_eq!(p.status, PaymentStatus::RequiresAction);
            }
        }
    }

    #[test]
    fn test_succeed_sources_and_guard() {
        for status in ALL {
            let mut p = in_status(status);
            let result = p.succeed(ChargeDetails::new("ch_1"), now());
            if status.is_open() {
                assert!(matches!(result, Ok(DomainEvent::PaymentSucceeded { .. })));
                assert_eq!(p.status, PaymentStatus::Succeeded);
                assert_eq!(p.paid_at, Some(now()));
                assert_eq!(p.provider_payment_id.as_deref(), Some("ch_1"));
            } else {
                assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
            }
        }

        let mut p = pending(10_000);
        assert!(matches!(
            p.succeed(ChargeDetails::new(""), now()),
            Err(DomainError::ValidationError(_))
        ));
        assert_eq!(p.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_fail_requires_code_and_message() {
        let mut p = pending(10_000);
        assert!(p.fail("", "declined", now()).is_err());
        assert!(p.fail("card_declined", " ", now()).is_err());
        assert_eq!(p.status, PaymentStatus::Pending);

        p.fail("card_declined", "Your card was declined", now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert!(p.failed_at.is_some());
        assert!(p.paid_at.is_none());

        assert!(matches!(
            p.fail("x", "y", now()),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel() {
        let mut p = pending(10_000);
        assert!(p.cancel(now()).unwrap().is_some());
        assert_eq!(p.status, PaymentStatus::Cancelled);
        assert!(p.cancel(now()).unwrap().is_none());

        let mut p = in_status(PaymentStatus::Succeeded);
        assert!(matches!(
            p.cancel(now()),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert_eq!(p.status, PaymentStatus::Succeeded);
    }

    #[test]
    fn test_refund_sequence() {
        let mut p = pending(10_000);
        p.succeed(ChargeDetails::new("pi_1"), now()).unwrap();

        let zero = usd(0);
        let window = Duration::days(30);
        p.authorize_refund(usd(4_000), zero, now(), window).unwrap();
        p.apply_refund(usd(4_000), RefundId::new(), now()).unwrap();
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(p.refundable_amount(), usd(6_000));

        p.authorize_refund(usd(6_000), zero, now(), window).unwrap();
        let event = p.apply_refund(usd(6_000), RefundId::new(), now()).unwrap();
        assert!(matches!(
            event,
            DomainEvent::PaymentRefunded {
                fully_refunded: true,
                ..
            }
        ));
        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refunded_amount, p.amount);

        assert!(matches!(
            p.authorize_refund(usd(1), zero, now(), window),
            Err(DomainError::RefundExceedsAmount { .. })
        ));
    }

    #[test]
    fn test_refund_guards() {
        let window = Duration::days(30);
        let p = pending(10_000);
        assert!(matches!(
            p.authorize_refund(usd(100), usd(0), now(), window),
            Err(DomainError::NotRefundable(PaymentStatus::Pending))
        ));

        let p = in_status(PaymentStatus::Succeeded);
        assert!(matches!(
            p.authorize_refund(usd(7_000), usd(4_000), now(), window),
            Err(DomainError::RefundExceedsAmount {
                requested: 7_000,
                refundable: 6_000
            })
        ));
        assert!(matches!(
            p.authorize_refund(usd(100), usd(0), now() + Duration::days(31), window),
            Err(DomainError::RefundWindowExpired { days: 30 })
        ));
        assert!(matches!(
            p.authorize_refund(Money::new(100, Currency::EUR).unwrap(), usd(0), now(), window),
            Err(DomainError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        let mut p = pending(10_000);
        let earlier = now() - Duration::minutes(5);
        p.process(earlier).unwrap();
        assert_eq!(p.updated_at, now());
    }
}
