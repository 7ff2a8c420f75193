//! Error types for the payment engine.

use crate::domain::{Currency, PaymentStatus};

/// Domain-level errors (validation failures and state-machine guard violations).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Cannot {action} a payment in status {from}")]
    InvalidTransition {
        from: PaymentStatus,
        action: &'static str,
    },

    #[error("Refund exceeds amount: requested {requested}, refundable {refundable}")]
    RefundExceedsAmount { requested: i64, refundable: i64 },

    #[error("Refund window of {days} days has expired")]
    RefundWindowExpired { days: i64 },

    #[error("Payment in status {0} is not refundable")]
    NotRefundable(PaymentStatus),

    #[error("Refund not found: {0}")]
    RefundNotFound(String),

    #[error("Refund {0} is already settled")]
    RefundSettled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl DomainError {
    /// Stable machine-readable code used at the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NegativeAmount | DomainError::AmountOverflow => "invalid_amount",
            DomainError::CurrencyMismatch { .. } => "currency_mismatch",
            DomainError::UnsupportedCurrency(_) => "unsupported_currency",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::RefundExceedsAmount { .. } => "refund_exceeds_amount",
            DomainError::RefundWindowExpired { .. } => "refund_window_expired",
            DomainError::NotRefundable(_) => "not_refundable",
            DomainError::RefundNotFound(_) => "refund_not_found",
            DomainError::RefundSettled(_) => "refund_settled",
            DomainError::ValidationError(_) => "validation_error",
        }
    }

    /// True for state-machine guard violations (as opposed to input validation).
    pub fn is_guard_violation(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidTransition { .. }
                | DomainError::RefundExceedsAmount { .. }
                | DomainError::RefundWindowExpired { .. }
                | DomainError::NotRefundable(_)
                | DomainError::RefundSettled(_)
                | DomainError::CurrencyMismatch { .. }
        )
    }
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rejected(DomainError),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Rejected(e) => e.code(),
            AppError::Provider(_) => "provider_error",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        if err.is_guard_violation() {
            AppError::Rejected(err)
        } else if let DomainError::RefundNotFound(id) = err {
            AppError::NotFound(format!("Refund not found: {}", id))
        } else {
            AppError::BadRequest(err.to_string())
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::BadRequest(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_violations_stay_typed() {
        let err: AppError = RepoError::Domain(DomainError::RefundExceedsAmount {
            requested: 10,
            refundable: 0,
        })
        .into();
        assert!(matches!(
            err,
            AppError::Rejected(DomainError::RefundExceedsAmount { .. })
        ));
        assert_eq!(err.kind(), "refund_exceeds_amount");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err: AppError = DomainError::UnsupportedCurrency("XYZ".into()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn database_maps_to_internal() {
        let err: AppError = RepoError::Database("boom".into()).into();
        assert_eq!(err.kind(), "internal");
    }
}
