//! Deterministic provider for local runs and tests.
//!
//! The payment method id picks the outcome of a confirmation:
//! `fail_*` is declined, `3ds_*` requires action, `async_*` stays
//! processing, `slow_*` never answers, anything else succeeds.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use payments_types::ports::{CreatedIntent, IntentStatus, PaymentProvider, ProviderError};
use payments_types::{CardDetails, ChargeDetails, Money, PaymentId, ProviderKind, RefundId};

pub struct SimulatedProvider {
    kind: ProviderKind,
    fail_refunds: AtomicBool,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(ProviderKind::Stripe)
    }
}

impl SimulatedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            fail_refunds: AtomicBool::new(false),
        }
    }

    /// Makes subsequent refund submissions fail.
    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_intent(
        &self,
        _payment_id: PaymentId,
        _order_id: &str,
        _amount: Money,
    ) -> Result<CreatedIntent, ProviderError> {
        let intent_id = format!("pi_sim_{}", Uuid::new_v4().simple());
        Ok(CreatedIntent {
            client_secret: Some(format!("{}_secret", intent_id)),
            intent_id,
            customer_id: None,
        })
    }

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method_id: &str,
    ) -> Result<IntentStatus, ProviderError> {
        if payment_method_id.starts_with("slow_") {
            std::future::pending::<()>().await;
        }
        if payment_method_id.starts_with("fail_") {
            return Ok(IntentStatus::Failed {
                code: "card_declined".into(),
                message: "Your card was declined.".into(),
            });
        }
        if payment_method_id.starts_with("3ds_") {
            return Ok(IntentStatus::RequiresAction);
        }
        if payment_method_id.starts_with("async_") {
            return Ok(IntentStatus::Processing);
        }

        Ok(IntentStatus::Succeeded(ChargeDetails {
            provider_payment_id: intent_id.to_string(),
            provider_customer_id: None,
            card: Some(CardDetails {
                last4: "4242".into(),
                brand: "visa".into(),
                exp_month: 12,
                exp_year: 2030,
            }),
            receipt_url: None,
        }))
    }

    async fn cancel_intent(&self, _intent_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_refund(
        &self,
        _intent_id: &str,
        _amount: Money,
        _refund_id: RefundId,
    ) -> Result<String, ProviderError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                code: "charge_disputed".into(),
                message: "Refund refused by provider".into(),
            });
        }
        Ok(format!("re_sim_{}", Uuid::new_v4().simple()))
    }
}
