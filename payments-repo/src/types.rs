//! Shared database row types with feature-gated fields for PostgreSQL and SQLite.
//!
//! PostgreSQL stores native UUID, JSONB and TIMESTAMPTZ values; SQLite stores
//! all three as TEXT. The mapping into domain types lives here and nowhere else.

use sqlx::FromRow;

use payments_types::domain::{CardDetails, OutboxEvent};
use payments_types::{
    Currency, Money, Payment, PaymentId, PaymentStatus, ReconciliationConflict, Refund, RefundId,
    RepoError,
};

#[cfg(feature = "postgres")]
use chrono::{DateTime, Utc};
#[cfg(feature = "postgres")]
use uuid::Uuid;

/// Column list shared by every payment SELECT.
macro_rules! payment_columns {
    () => {
        "id, order_id, user_id, amount, refunded_amount, currency, payment_method, provider, \
         status, payment_intent_id, provider_payment_id, provider_customer_id, card_last4, \
         card_brand, card_exp_month, card_exp_year, description, receipt_email, receipt_url, \
         metadata, failure_code, failure_message, paid_at, failed_at, cancelled_at, created_at, \
         updated_at"
    };
}

macro_rules! refund_columns {
    () => {
        "id, payment_id, amount, currency, status, reason, notes, provider_refund_id, \
         failure_reason, requested_by, processed_by, metadata, refunded_at, failed_at, \
         created_at, updated_at"
    };
}

macro_rules! outbox_columns {
    () => {
        "id, event_id, topic, partition_key, payload, created_at, published_at, attempts, last_error"
    };
}

macro_rules! conflict_columns {
    () => {
        "id, event_id, event_type, payment_id, local_status, reason, payload, created_at"
    };
}

pub(crate) use {conflict_columns, outbox_columns, payment_columns, refund_columns};

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs (derive FromRow for automatic mapping)
// ─────────────────────────────────────────────────────────────────────────────

/// Payment row from database.
#[derive(FromRow)]
pub struct DbPayment {
    #[cfg(feature = "postgres")]
    pub id: Uuid,
    #[cfg(not(feature = "postgres"))]
    pub id: String,

    pub order_id: String,
    pub user_id: String,
    pub amount: i64,
    pub refunded_amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub provider: String,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub receipt_url: Option<String>,

    #[cfg(feature = "postgres")]
    pub metadata: serde_json::Value,
    #[cfg(not(feature = "postgres"))]
    pub metadata: String,

    pub failure_code: Option<String>,
    pub failure_message: Option<String>,

    #[cfg(feature = "postgres")]
    pub paid_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub paid_at: Option<String>,

    #[cfg(feature = "postgres")]
    pub failed_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub failed_at: Option<String>,

    #[cfg(feature = "postgres")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub cancelled_at: Option<String>,

    #[cfg(feature = "postgres")]
    pub created_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub created_at: String,

    #[cfg(feature = "postgres")]
    pub updated_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub updated_at: String,
}

impl DbPayment {
    pub fn into_domain(self) -> Result<Payment, RepoError> {
        let currency = parse_currency(&self.currency)?;
        let amount = Money::new(self.amount, currency)?;
        let refunded_amount = Money::new(self.refunded_amount, currency)?;

        let card = match (
            self.card_last4,
            self.card_brand,
            self.card_exp_month,
            self.card_exp_year,
        ) {
            (Some(last4), Some(brand), Some(exp_month), Some(exp_year)) => Some(CardDetails {
                last4,
                brand,
                exp_month,
                exp_year,
            }),
            _ => None,
        };

        #[cfg(feature = "postgres")]
        let (id, metadata, paid_at, failed_at, cancelled_at, created_at, updated_at) = (
            self.id,
            self.metadata,
            self.paid_at,
            self.failed_at,
            self.cancelled_at,
            self.created_at,
            self.updated_at,
        );

        #[cfg(not(feature = "postgres"))]
        let (id, metadata, paid_at, failed_at, cancelled_at, created_at, updated_at) = (
            parse_uuid(&self.id)?,
            parse_json(&self.metadata)?,
            parse_opt_ts(self.paid_at)?,
            parse_opt_ts(self.failed_at)?,
            parse_opt_ts(self.cancelled_at)?,
            parse_ts(&self.created_at)?,
            parse_ts(&self.updated_at)?,
        );

        Ok(Payment {
            id: PaymentId::from_uuid(id),
            order_id: self.order_id,
            user_id: self.user_id,
            amount,
            refunded_amount,
            method: self.payment_method.parse()?,
            provider: self.provider.parse()?,
            status: self.status.parse::<PaymentStatus>()?,
            payment_intent_id: self.payment_intent_id,
            provider_payment_id: self.provider_payment_id,
            provider_customer_id: self.provider_customer_id,
            card,
            description: self.description,
            receipt_email: self.receipt_email,
            receipt_url: self.receipt_url,
            metadata,
            failure_code: self.failure_code,
            failure_message: self.failure_message,
            paid_at,
            failed_at,
            cancelled_at,
            created_at,
            updated_at,
        })
    }
}

/// Refund row from database.
#[derive(FromRow)]
pub struct DbRefund {
    #[cfg(feature = "postgres")]
    pub id: Uuid,
    #[cfg(not(feature = "postgres"))]
    pub id: String,

    #[cfg(feature = "postgres")]
    pub payment_id: Uuid,
    #[cfg(not(feature = "postgres"))]
    pub payment_id: String,

    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub notes: Option<String>,
    pub provider_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_by: Option<String>,
    pub processed_by: Option<String>,

    #[cfg(feature = "postgres")]
    pub metadata: serde_json::Value,
    #[cfg(not(feature = "postgres"))]
    pub metadata: String,

    #[cfg(feature = "postgres")]
    pub refunded_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub refunded_at: Option<String>,

    #[cfg(feature = "postgres")]
    pub failed_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub failed_at: Option<String>,

    #[cfg(feature = "postgres")]
    pub created_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub created_at: String,

    #[cfg(feature = "postgres")]
    pub updated_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub updated_at: String,
}

impl DbRefund {
    pub fn into_domain(self) -> Result<Refund, RepoError> {
        let currency = parse_currency(&self.currency)?;
        let amount = Money::new(self.amount, currency)?;

        #[cfg(feature = "postgres")]
        let (id, payment_id, metadata, refunded_at, failed_at, created_at, updated_at) = (
            self.id,
            self.payment_id,
            self.metadata,
            self.refunded_at,
            self.failed_at,
            self.created_at,
            self.updated_at,
        );

        #[cfg(not(feature = "postgres"))]
        let (id, payment_id, metadata, refunded_at, failed_at, created_at, updated_at) = (
            parse_uuid(&self.id)?,
            parse_uuid(&self.payment_id)?,
            parse_json(&self.metadata)?,
            parse_opt_ts(self.refunded_at)?,
            parse_opt_ts(self.failed_at)?,
            parse_ts(&self.created_at)?,
            parse_ts(&self.updated_at)?,
        );

        Ok(Refund {
            id: RefundId::from_uuid(id),
            payment_id: PaymentId::from_uuid(payment_id),
            amount,
            status: self.status.parse()?,
            reason: self.reason.parse()?,
            notes: self.notes,
            provider_refund_id: self.provider_refund_id,
            failure_reason: self.failure_reason,
            requested_by: self.requested_by,
            processed_by: self.processed_by,
            metadata,
            refunded_at,
            failed_at,
            created_at,
            updated_at,
        })
    }
}

/// Outbox row from database.
#[derive(FromRow)]
pub struct DbOutboxEvent {
    pub id: i64,

    #[cfg(feature = "postgres")]
    pub event_id: Uuid,
    #[cfg(not(feature = "postgres"))]
    pub event_id: String,

    pub topic: String,
    pub partition_key: String,

    #[cfg(feature = "postgres")]
    pub payload: serde_json::Value,
    #[cfg(not(feature = "postgres"))]
    pub payload: String,

    #[cfg(feature = "postgres")]
    pub created_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub created_at: String,

    #[cfg(feature = "postgres")]
    pub published_at: Option<DateTime<Utc>>,
    #[cfg(not(feature = "postgres"))]
    pub published_at: Option<String>,

    pub attempts: i32,
    pub last_error: Option<String>,
}

impl DbOutboxEvent {
    pub fn into_domain(self) -> Result<OutboxEvent, RepoError> {
        #[cfg(feature = "postgres")]
        let (event_id, payload, created_at, published_at) =
            (self.event_id, self.payload, self.created_at, self.published_at);

        #[cfg(not(feature = "postgres"))]
        let (event_id, payload, created_at, published_at) = (
            parse_uuid(&self.event_id)?,
            parse_json(&self.payload)?,
            parse_ts(&self.created_at)?,
            parse_opt_ts(self.published_at)?,
        );

        Ok(OutboxEvent {
            id: self.id,
            event_id,
            topic: self.topic,
            partition_key: self.partition_key,
            payload,
            created_at,
            published_at,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

/// Reconciliation conflict row from database.
#[derive(FromRow)]
pub struct DbConflict {
    #[cfg(feature = "postgres")]
    pub id: Uuid,
    #[cfg(not(feature = "postgres"))]
    pub id: String,

    pub event_id: String,
    pub event_type: String,

    #[cfg(feature = "postgres")]
    pub payment_id: Option<Uuid>,
    #[cfg(not(feature = "postgres"))]
    pub payment_id: Option<String>,

    pub local_status: Option<String>,
    pub reason: String,

    #[cfg(feature = "postgres")]
    pub payload: serde_json::Value,
    #[cfg(not(feature = "postgres"))]
    pub payload: String,

    #[cfg(feature = "postgres")]
    pub created_at: DateTime<Utc>,
    #[cfg(not(feature = "postgres"))]
    pub created_at: String,
}

impl DbConflict {
    pub fn into_domain(self) -> Result<ReconciliationConflict, RepoError> {
        #[cfg(feature = "postgres")]
        let (id, payment_id, payload, created_at) =
            (self.id, self.payment_id, self.payload, self.created_at);

        #[cfg(not(feature = "postgres"))]
        let (id, payment_id, payload, created_at) = (
            parse_uuid(&self.id)?,
            self.payment_id.as_deref().map(parse_uuid).transpose()?,
            parse_json(&self.payload)?,
            parse_ts(&self.created_at)?,
        );

        let local_status = self
            .local_status
            .map(|s| s.parse::<PaymentStatus>())
            .transpose()?;

        Ok(ReconciliationConflict {
            id,
            event_id: self.event_id,
            event_type: self.event_type,
            payment_id: payment_id.map(PaymentId::from_uuid),
            local_status,
            reason: self.reason,
            payload,
            created_at,
        })
    }
}

/// Count row.
#[derive(FromRow)]
pub struct DbCount {
    pub count: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn parse_currency(s: &str) -> Result<Currency, RepoError> {
    s.parse::<Currency>()
        .map_err(|_| RepoError::Database(format!("Invalid currency in database: {}", s)))
}

#[cfg(not(feature = "postgres"))]
fn parse_uuid(s: &str) -> Result<uuid::Uuid, RepoError> {
    uuid::Uuid::parse_str(s).map_err(|e| RepoError::Database(e.to_string()))
}

#[cfg(not(feature = "postgres"))]
fn parse_json(s: &str) -> Result<serde_json::Value, RepoError> {
    serde_json::from_str(s).map_err(|e| RepoError::Database(e.to_string()))
}

#[cfg(not(feature = "postgres"))]
fn parse_ts(s: &str) -> Result<chrono::DateTime<chrono::Utc>, RepoError> {
    Ok(chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| RepoError::Database(e.to_string()))?
        .with_timezone(&chrono::Utc))
}

#[cfg(not(feature = "postgres"))]
fn parse_opt_ts(s: Option<String>) -> Result<Option<chrono::DateTime<chrono::Utc>>, RepoError> {
    s.as_deref().map(parse_ts).transpose()
}

/// Fixed-width RFC 3339 timestamp so TEXT columns sort chronologically.
#[cfg(not(feature = "postgres"))]
pub fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
