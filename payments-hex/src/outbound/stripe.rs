//! Stripe REST client implementing the provider port.
//!
//! Requests are form-encoded and authenticated with the secret key. Every
//! mutating call carries an `Idempotency-Key` derived from our own ids, so
//! a retried request cannot create a second intent or refund.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use payments_types::ports::{CreatedIntent, IntentStatus, PaymentProvider, ProviderError};
use payments_types::{CardDetails, ChargeDetails, Money, PaymentId, ProviderKind, RefundId};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeProvider {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        idempotency_key: Option<String>,
        form: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()));
        }

        let error = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|env| env.error)
            .unwrap_or_default();
        if status.is_client_error() {
            let (code, message) = error.code_and_message();
            Err(ProviderError::Rejected { code, message })
        } else {
            Err(ProviderError::Request(format!(
                "{} returned {}",
                path,
                status.as_u16()
            )))
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_intent(
        &self,
        payment_id: PaymentId,
        order_id: &str,
        amount: Money,
    ) -> Result<CreatedIntent, ProviderError> {
        let form = [
            ("amount", amount.amount().to_string()),
            ("currency", amount.currency().code().to_lowercase()),
            ("metadata[payment_id]", payment_id.to_string()),
            ("metadata[order_id]", order_id.to_string()),
        ];
        let intent: PaymentIntentObject = self
            .post(
                "/v1/payment_intents",
                Some(format!("create-{}", payment_id)),
                &form,
            )
            .await?;

        Ok(CreatedIntent {
            intent_id: intent.id,
            customer_id: intent.customer,
            client_secret: intent.client_secret,
        })
    }

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method_id: &str,
    ) -> Result<IntentStatus, ProviderError> {
        let form = [("payment_method", payment_method_id.to_string())];
        let intent: PaymentIntentObject = self
            .post(
                &format!("/v1/payment_intents/{}/confirm", intent_id),
                None,
                &form,
            )
            .await?;
        intent.intent_status()
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), ProviderError> {
        let _: PaymentIntentObject = self
            .post(
                &format!("/v1/payment_intents/{}/cancel", intent_id),
                None,
                &[],
            )
            .await?;
        Ok(())
    }

    async fn create_refund(
        &self,
        intent_id: &str,
        amount: Money,
        refund_id: RefundId,
    ) -> Result<String, ProviderError> {
        let form = [
            ("payment_intent", intent_id.to_string()),
            ("amount", amount.amount().to_string()),
            ("metadata[refund_id]", refund_id.to_string()),
        ];
        let refund: RefundObject = self
            .post(
                "/v1/refunds",
                Some(format!("refund-{}", refund_id)),
                &form,
            )
            .await?;
        Ok(refund.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire objects (shared with webhook parsing)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    pub(crate) fn code_and_message(&self) -> (String, String) {
        let code = self
            .decline_code
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| "payment_failed".to_string());
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| "Payment failed".to_string());
        (code, message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PaymentIntentObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Charge id, or the charge object when expanded.
    #[serde(default)]
    pub latest_charge: Option<serde_json::Value>,
    #[serde(default)]
    pub last_payment_error: Option<ApiError>,
}

impl PaymentIntentObject {
    pub(crate) fn charge_details(&self) -> ChargeDetails {
        let mut details = ChargeDetails::new(self.id.clone());
        details.provider_customer_id = self.customer.clone();

        match &self.latest_charge {
            Some(serde_json::Value::String(charge_id)) => {
                details.provider_payment_id = charge_id.clone();
            }
            Some(charge @ serde_json::Value::Object(_)) => {
                if let Some(charge_id) = charge["id"].as_str() {
                    details.provider_payment_id = charge_id.to_string();
                }
                details.receipt_url = charge["receipt_url"].as_str().map(str::to_string);
                details.card = card_from_charge(charge);
            }
            _ => {}
        }
        details
    }

    pub(crate) fn failure(&self) -> (String, String) {
        self.last_payment_error
            .clone()
            .unwrap_or_default()
            .code_and_message()
    }

    pub(crate) fn intent_status(&self) -> Result<IntentStatus, ProviderError> {
        match self.status.as_str() {
            "succeeded" => Ok(IntentStatus::Succeeded(self.charge_details())),
            "processing" => Ok(IntentStatus::Processing),
            "requires_action" | "requires_confirmation" => Ok(IntentStatus::RequiresAction),
            "canceled" => Ok(IntentStatus::Cancelled),
            "requires_payment_method" if self.last_payment_error.is_some() => {
                let (code, message) = self.failure();
                Ok(IntentStatus::Failed { code, message })
            }
            other => Err(ProviderError::InvalidResponse(format!(
                "unexpected intent status {}",
                other
            ))),
        }
    }
}

fn card_from_charge(charge: &serde_json::Value) -> Option<CardDetails> {
    let card = &charge["payment_method_details"]["card"];
    Some(CardDetails {
        last4: card["last4"].as_str()?.to_string(),
        brand: card["brand"].as_str()?.to_string(),
        exp_month: card["exp_month"].as_i64()? as i32,
        exp_year: card["exp_year"].as_i64()? as i32,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefundObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
