//! # Payments Types
//!
//! Domain types and port traits for the payment lifecycle engine.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Money, the Payment state machine, the refund ledger, domain events
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain, repository and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    CardDetails, ChargeDetails, Currency, DomainEvent, Money, NewPayment, NotificationKind,
    OutboxEvent, Payment, PaymentId, PaymentMethod, PaymentStatus, ProviderKind,
    ProviderNotification, ReconciliationConflict, Refund, RefundId, RefundLedger, RefundLookup,
    RefundReason, RefundRequest, RefundStatus, WebhookAck,
};
pub use dto::*;
pub use error::{AppError, DomainError, RepoError};
pub use ports::{
    Clock, IdempotencyStore, MessageBus, OutboxStore, PaymentProvider, PaymentRepository,
    SystemClock,
};
