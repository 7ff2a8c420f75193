//! In-memory implementation of the persistence ports.
//!
//! One mutex stands in for the database: a mutation sees the state under the
//! lock, works on copies and only writes back once everything (payment,
//! refunds, dedup key, outbox rows) is ready, so a failure leaves nothing
//! behind. Used by the service and HTTP tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use payments_types::domain::OutboxEvent;
use payments_types::ports::{MutationOutcome, PaymentMutation};
use payments_types::{
    DomainEvent, IdempotencyStore, OutboxStore, Payment, PaymentId, PaymentRepository,
    ReconciliationConflict, Refund, RefundId, RefundLedger, RepoError,
};

#[derive(Default)]
struct State {
    payments: HashMap<PaymentId, Payment>,
    /// Creation order.
    refunds: Vec<Refund>,
    processed: HashSet<String>,
    outbox: Vec<OutboxEvent>,
    next_outbox_id: i64,
    conflicts: Vec<ReconciliationConflict>,
}

impl State {
    fn enqueue(&mut self, events: &[DomainEvent]) {
        let now = Utc::now();
        for event in events {
            let new = event.to_outbox(now);
            self.next_outbox_id += 1;
            self.outbox.push(OutboxEvent {
                id: self.next_outbox_id,
                event_id: new.event_id,
                topic: new.topic,
                partition_key: new.partition_key,
                payload: new.payload,
                created_at: new.created_at,
                published_at: None,
                attempts: 0,
                last_error: None,
            });
        }
    }

    fn refunds_of(&self, payment_id: PaymentId) -> Vec<Refund> {
        self.refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    fail_outbox_writes: Arc<AtomicBool>,
    fail_conflict_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write that would insert outbox rows fail, as if the
    /// outbox insert broke after the aggregate update.
    pub fn set_fail_outbox_writes(&self, fail: bool) {
        self.fail_outbox_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes conflict inserts fail before anything is written.
    pub fn set_fail_conflict_writes(&self, fail: bool) {
        self.fail_conflict_writes.store(fail, Ordering::SeqCst);
    }

    /// All outbox rows, published or not, in sequence order.
    pub async fn outbox(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.clone()
    }

    fn check_outbox_write(&self, events: &[DomainEvent]) -> Result<(), RepoError> {
        if !events.is_empty() && self.fail_outbox_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Database("outbox insert failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(
        &self,
        payment: &Payment,
        events: Vec<DomainEvent>,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        if state
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id)
        {
            return Err(RepoError::Conflict(format!(
                "order {} already has a payment",
                payment.order_id
            )));
        }
        self.check_outbox_write(&events)?;

        state.payments.insert(payment.id, payment.clone());
        state.enqueue(&events);
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .find(|p| {
                p.payment_intent_id.as_deref() == Some(reference)
                    || p.provider_payment_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Payment>, i64), RepoError> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = payments.len() as i64;
        let page = payments
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, RepoError> {
        Ok(self.state.lock().await.refunds_of(payment_id))
    }

    async fn mutate(
        &self,
        id: PaymentId,
        dedup_key: Option<&str>,
        mutation: PaymentMutation,
    ) -> Result<MutationOutcome, RepoError> {
        let mut state = self.state.lock().await;
        if let Some(key) = dedup_key {
            if state.processed.contains(key) {
                return Ok(MutationOutcome::AlreadyProcessed);
            }
        }

        let mut payment = state
            .payments
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let mut ledger = RefundLedger::new(id, state.refunds_of(id));

        let events = mutation(&mut payment, &mut ledger)?;
        self.check_outbox_write(&events)?;

        // Commit.
        if let Some(key) = dedup_key {
            state.processed.insert(key.to_string());
        }
        state.payments.insert(id, payment.clone());
        for refund in &ledger.refunds {
            match state.refunds.iter_mut().find(|r| r.id == refund.id) {
                Some(stored) => *stored = refund.clone(),
                None => state.refunds.push(refund.clone()),
            }
        }
        state.enqueue(&events);

        Ok(MutationOutcome::Applied {
            payment,
            ledger,
            events,
        })
    }

    async fn record_conflict(
        &self,
        conflict: &ReconciliationConflict,
        dedup_key: Option<&str>,
    ) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        if let Some(key) = dedup_key {
            if state.processed.contains(key) {
                return Ok(false);
            }
        }
        if self.fail_conflict_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Database("conflict insert failed".into()));
        }
        if let Some(key) = dedup_key {
            state.processed.insert(key.to_string());
        }
        state.conflicts.push(conflict.clone());
        Ok(true)
    }

    async fn list_conflicts(&self, limit: i64) -> Result<Vec<ReconciliationConflict>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .conflicts
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        Ok(self.state.lock().await.processed.insert(event_id.to_string()))
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        Ok(self.state.lock().await.processed.contains(event_id))
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for event in state.outbox.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.published_at = Some(now);
        }
        Ok(())
    }

    async fn record_publish_failure(&self, ids: &[i64], error: &str) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        for event in state.outbox.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.attempts += 1;
            event.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
