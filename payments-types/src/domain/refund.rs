//! Refund domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;
use super::payment::PaymentId;
use crate::error::DomainError;

/// Unique identifier for a Refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundId(Uuid);

impl RefundId {
    /// Creates a new random RefundId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a RefundId from an existing UUID.
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

impl Default for RefundId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RefundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RefundId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Succeeded => "SUCCEEDED",
            RefundStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RefundStatus::Pending),
            "SUCCEEDED" => Ok(RefundStatus::Succeeded),
            "FAILED" => Ok(RefundStatus::Failed),
            other => Err(DomainError::ValidationError(format!(
                "Unknown refund status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundReason {
    CustomerRequest,
    Fraudulent,
    Duplicate,
    OrderCancelled,
    ProductDefective,
    ProductNotReceived,
    Other,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::CustomerRequest => "CUSTOMER_REQUEST",
            RefundReason::Fraudulent => "FRAUDULENT",
            RefundReason::Duplicate => "DUPLICATE",
            RefundReason::OrderCancelled => "ORDER_CANCELLED",
            RefundReason::ProductDefective => "PRODUCT_DEFECTIVE",
            RefundReason::ProductNotReceived => "PRODUCT_NOT_RECEIVED",
            RefundReason::Other => "OTHER",
        }
    }
}

impl std::str::FromStr for RefundReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CUSTOMER_REQUEST" => Ok(RefundReason::CustomerRequest),
            "FRAUDULENT" => Ok(RefundReason::Fraudulent),
            "DUPLICATE" => Ok(RefundReason::Duplicate),
            "ORDER_CANCELLED" => Ok(RefundReason::OrderCancelled),
            "PRODUCT_DEFECTIVE" => Ok(RefundReason::ProductDefective),
            "PRODUCT_NOT_RECEIVED" => Ok(RefundReason::ProductNotReceived),
            "OTHER" => Ok(RefundReason::Other),
            other => Err(DomainError::ValidationError(format!(
                "Unknown refund reason: {}",
                other
            ))),
        }
    }
}

/// A refund attempt against one payment.
///
/// Immutable once SUCCEEDED or FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: RefundId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub status: RefundStatus,
    pub reason: RefundReason,
    pub notes: Option<String>,
    pub provider_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_by: Option<String>,
    pub processed_by: Option<String>,
    pub metadata: serde_json::Value,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn is_settled(&self) -> bool {
        self.status != RefundStatus::Pending
    }

    /// PENDING → SUCCEEDED.
    pub(crate) fn succeed(
        &mut self,
        provider_refund_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.is_settled() {
            return Err(DomainError::RefundSettled(self.id.to_string()));
        }
        self.status = RefundStatus::Succeeded;
        if provider_refund_id.is_some() {
            self.provider_refund_id = provider_refund_id;
        }
        self.refunded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → FAILED.
    pub(crate) fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_settled() {
            return Err(DomainError::RefundSettled(self.id.to_string()));
        }
        self.status = RefundStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.failed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
