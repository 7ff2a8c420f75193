//! Payment provider port.

use crate::domain::{ChargeDetails, Money, PaymentId, ProviderKind, RefundId};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider rejected the request: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// A freshly created payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub customer_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Provider-side state of an intent after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    Processing,
    RequiresAction,
    Succeeded(ChargeDetails),
    Failed { code: String, message: String },
    Cancelled,
}

#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync + 'static {
    fn kind(&self) -> ProviderKind;

    async fn create_intent(
        &self,
        payment_id: PaymentId,
        order_id: &str,
        amount: Money,
    ) -> Result<CreatedIntent, ProviderError>;

    async fn confirm_intent(
        &self,
        intent_id: &str,
        payment_method_id: &str,
    ) -> Result<IntentStatus, ProviderError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), ProviderError>;

    /// Submits a refund. Returns the provider's refund id.
    async fn create_refund(
        &self,
        intent_id: &str,
        amount: Money,
        refund_id: RefundId,
    ) -> Result<String, ProviderError>;
}
