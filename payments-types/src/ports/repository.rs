//! Repository port trait.
//!
//! This is the primary port in our hexagonal architecture.
//! Adapters (Postgres, SQLite) implement it; the service tests use an
//! in-memory fake.

use crate::domain::{
    DomainEvent, Payment, PaymentId, ReconciliationConflict, Refund, RefundId, RefundLedger,
};
use crate::error::{DomainError, RepoError};

/// A state change applied to a locked payment and its refund ledger.
///
/// Returns the events to enqueue. An error leaves both untouched.
pub type PaymentMutation = Box<
    dyn FnOnce(&mut Payment, &mut RefundLedger) -> Result<Vec<DomainEvent>, DomainError> + Send,
>;

/// Result of [`PaymentRepository::mutate`].
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// The mutation ran and was committed together with its outbox rows.
    Applied {
        payment: Payment,
        ledger: RefundLedger,
        events: Vec<DomainEvent>,
    },
    /// The deduplication key had already been recorded; nothing ran.
    AlreadyProcessed,
}

/// Persistence port for the payment aggregate.
///
/// Every write that changes a payment or refund MUST insert the produced
/// outbox rows in the same database transaction.
#[async_trait::async_trait]
pub trait PaymentRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Payment Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts a new payment with its creation events.
    ///
    /// Fails with `RepoError::Conflict` when the order already has a payment.
    async fn insert_payment(
        &self,
        payment: &Payment,
        events: Vec<DomainEvent>,
    ) -> Result<(), RepoError>;

    /// Gets a payment by ID.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError>;

    /// Finds the payment for an order.
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, RepoError>;

    /// Finds a payment by intent id or provider payment id.
    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError>;

    /// Lists a user's payments, newest first, with the total count.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Payment>, i64), RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────────

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError>;

    /// Lists refunds of a payment in creation order.
    async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Locked mutation (MUST be atomic)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Runs `mutation` against the payment under an exclusive row lock.
    ///
    /// Inside one transaction: records `dedup_key` as processed (returning
    /// `AlreadyProcessed` if it was already present), locks and loads the
    /// payment and its refunds, runs the mutation, persists both and inserts
    /// one outbox row per returned event. Returns `RepoError::NotFound` when
    /// the payment does not exist and `RepoError::Domain` when the mutation
    /// rejects the change.
    async fn mutate(
        &self,
        id: PaymentId,
        dedup_key: Option<&str>,
        mutation: PaymentMutation,
    ) -> Result<MutationOutcome, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation log
    // ─────────────────────────────────────────────────────────────────────────────

    /// Stores a conflict.
    ///
    /// With a `dedup_key`, the key is recorded in the same transaction as the
    /// conflict row; `false` means the key was already present and nothing
    /// was written.
    async fn record_conflict(
        &self,
        conflict: &ReconciliationConflict,
        dedup_key: Option<&str>,
    ) -> Result<bool, RepoError>;

    /// Most recent conflicts first.
    async fn list_conflicts(&self, limit: i64) -> Result<Vec<ReconciliationConflict>, RepoError>;
}
