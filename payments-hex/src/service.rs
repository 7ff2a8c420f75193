//! Payment Application Service
//!
//! Orchestrates the payment use cases through the ports. Provider calls are
//! made outside of [`PaymentRepository::mutate`], so the per-payment lock is
//! only held for the local state transition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use payments_types::ports::{
    IntentStatus, MutationOutcome, PaymentMutation, ProviderError,
};
use payments_types::{
    AppError, Clock, ConfirmPaymentRequest, CreatePaymentRequest, CreateRefundRequest, Currency,
    DomainError, DomainEvent, IdempotencyStore, Money, NewPayment, PageQuery, Payment, PaymentId,
    PaymentListResponse, PaymentProvider, PaymentRepository, PaymentResponse, PaymentStatus,
    ReconciliationConflict, Refund, RefundId, RefundLedger, RefundLookup, RefundRequest, RepoError,
    SystemClock,
};

use uuid::Uuid;

use crate::cache::PaymentCache;

/// Tunables for the payment use cases.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Refunds are accepted up to this long after `paid_at`.
    pub refund_window: chrono::Duration,
    /// Upper bound on a single provider call made on behalf of a caller.
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            refund_window: chrono::Duration::days(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Application service for payment operations.
///
/// Generic over the repository so the SQL adapters and the in-memory store
/// are swapped without code changes.
pub struct PaymentService<R: PaymentRepository + IdempotencyStore> {
    pub(crate) repo: R,
    provider: Arc<dyn PaymentProvider>,
    pub(crate) cache: PaymentCache,
    pub(crate) clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl<R: PaymentRepository + IdempotencyStore> PaymentService<R> {
    pub fn new(repo: R, provider: Arc<dyn PaymentProvider>, cache: PaymentCache) -> Self {
        Self {
            repo,
            provider,
            cache,
            clock: Arc::new(SystemClock),
            config: ServiceConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns a reference to the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payment Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates the payment for an order in PENDING.
    ///
    /// An order that already has an unsettled payment gets that payment back.
    #[tracing::instrument(skip(self, req), fields(order_id = %req.order_id, amount = req.amount))]
    pub async fn create_payment(&self, req: CreatePaymentRequest) -> Result<Payment, AppError> {
        let currency: Currency = req.currency.parse()?;
        let amount = Money::new(req.amount, currency)?;

        let provider = req.provider.unwrap_or_else(|| self.provider.kind());
        if provider != self.provider.kind() {
            return Err(AppError::BadRequest(format!(
                "Provider {} is not configured",
                provider.as_str()
            )));
        }

        if let Some(existing) = self.repo.find_by_order_id(&req.order_id).await? {
            return reuse_for_order(existing);
        }

        let (mut payment, event) = Payment::create(
            NewPayment {
                order_id: req.order_id,
                user_id: req.user_id,
                amount,
                method: req.payment_method,
                provider,
                payment_intent_id: None,
                provider_customer_id: None,
                description: req.description,
                receipt_email: req.receipt_email,
                metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
            },
            self.clock.now(),
        )?;

        let intent = self
            .call_provider(
                self.provider
                    .create_intent(payment.id, &payment.order_id, payment.amount),
            )
            .await
            .map_err(timed_out)?
            .map_err(provider_error)?;
        payment.payment_intent_id = Some(intent.intent_id);
        payment.provider_customer_id = intent.customer_id;

        match self.repo.insert_payment(&payment, vec![event]).await {
            Ok(()) => {
                tracing::info!(payment_id = %payment.id, "payment created");
                Ok(payment)
            }
            Err(RepoError::Conflict(_)) => {
                // Lost the race on order_id; the stored payment wins.
                let existing = self
                    .repo
                    .find_by_order_id(&payment.order_id)
                    .await?
                    .ok_or_else(|| AppError::Internal("order conflict without a payment".into()))?;
                reuse_for_order(existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Confirms the payment with the provider and applies the result.
    ///
    /// When the provider does not answer within the request timeout the
    /// payment is moved to PROCESSING and returned; the outcome arrives later
    /// through a provider notification.
    #[tracing::instrument(skip(self, req), fields(payment_id = %id))]
    pub async fn confirm_payment(
        &self,
        id: PaymentId,
        req: ConfirmPaymentRequest,
    ) -> Result<Payment, AppError> {
        if req.payment_method_id.trim().is_empty() {
            return Err(AppError::BadRequest("paymentMethodId is required".into()));
        }

        let payment = self.load(id).await?;
        if !payment.status.is_open() {
            return Err(AppError::Rejected(DomainError::InvalidTransition {
                from: payment.status,
                action: "confirm",
            }));
        }
        let intent_id = payment
            .payment_intent_id
            .clone()
            .ok_or_else(|| AppError::BadRequest("Payment has no provider intent".into()))?;

        let status = match self
            .call_provider(self.provider.confirm_intent(&intent_id, &req.payment_method_id))
            .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(ProviderError::Rejected { code, message })) => {
                IntentStatus::Failed { code, message }
            }
            Ok(Err(e)) => return Err(provider_error(e)),
            Err(_) => {
                tracing::warn!(payment_id = %id, "provider confirmation timed out, payment left processing");
                IntentStatus::Processing
            }
        };

        let settled = matches!(
            status,
            IntentStatus::Succeeded(_) | IntentStatus::Failed { .. }
        );
        let payload = intent_payload(&intent_id, &status);
        let now = self.clock.now();
        match self
            .transition(id, None, Box::new(move |p, _| apply_intent_status(p, status, now)))
            .await
        {
            Ok(outcome) => applied_payment(outcome),
            // The provider settled an intent the payment moved away from in
            // the meantime.
            Err(RepoError::Domain(e)) if settled => {
                self.record_confirm_conflict(id, &intent_id, payload, &e)
                    .await?;
                Err(AppError::Rejected(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels an open payment. Cancelling a cancelled payment is a no-op.
    #[tracing::instrument(skip(self), fields(payment_id = %id))]
    pub async fn cancel_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        let payment = self.load(id).await?;
        if payment.status == PaymentStatus::Cancelled {
            return Ok(payment);
        }
        if !payment.status.is_open() {
            return Err(AppError::Rejected(DomainError::InvalidTransition {
                from: payment.status,
                action: "cancel",
            }));
        }

        if let Some(intent_id) = payment.payment_intent_id.as_deref() {
            self.call_provider(self.provider.cancel_intent(intent_id))
                .await
                .map_err(timed_out)?
                .map_err(provider_error)?;
        }

        let now = self.clock.now();
        let outcome = self
            .transition(
                id,
                None,
                Box::new(move |p, _| Ok(p.cancel(now)?.into_iter().collect())),
            )
            .await?;
        applied_payment(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens a refund and submits it to the provider.
    ///
    /// The refund is committed PENDING before the provider call. It settles
    /// when the provider's notification arrives; a provider rejection marks
    /// it FAILED immediately.
    #[tracing::instrument(skip(self, req), fields(payment_id = %id, amount = req.amount))]
    pub async fn request_refund(
        &self,
        id: PaymentId,
        req: CreateRefundRequest,
    ) -> Result<Refund, AppError> {
        let payment = self.load(id).await?;
        let request = RefundRequest {
            amount: Money::new(req.amount, payment.currency())?,
            reason: req.reason,
            notes: req.notes,
            requested_by: req.requested_by,
            metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
        };

        let now = self.clock.now();
        let window = self.config.refund_window;
        let outcome = self
            .transition(
                id,
                None,
                Box::new(move |p, ledger| {
                    let (_, event) = ledger.open(p, request, now, window)?;
                    Ok(vec![event])
                }),
            )
            .await?;
        let (payment, ledger) = match outcome {
            MutationOutcome::Applied { payment, ledger, .. } => (payment, ledger),
            MutationOutcome::AlreadyProcessed => {
                return Err(AppError::Internal("unexpected dedup outcome".into()));
            }
        };
        let refund = ledger
            .refunds
            .last()
            .cloned()
            .ok_or_else(|| AppError::Internal("refund missing after open".into()))?;

        let intent_id = payment
            .payment_intent_id
            .as_deref()
            .or(payment.provider_payment_id.as_deref())
            .ok_or_else(|| AppError::Internal("refundable payment without provider id".into()))?;

        match self
            .call_provider(self.provider.create_refund(intent_id, refund.amount, refund.id))
            .await
        {
            Ok(Ok(provider_refund_id)) => {
                let refund_id = refund.id;
                let outcome = self
                    .transition(
                        id,
                        None,
                        Box::new(move |_, ledger| {
                            ledger.attach_provider_id(refund_id, &provider_refund_id)?;
                            Ok(Vec::new())
                        }),
                    )
                    .await?;
                tracing::info!(payment_id = %id, refund_id = %refund.id, "refund submitted");
                applied_refund(outcome, refund.id)
            }
            Ok(Err(e)) => {
                tracing::warn!(payment_id = %id, refund_id = %refund.id, error = %e, "provider refused refund");
                let reason = e.to_string();
                let lookup = RefundLookup::Id(refund.id);
                self.transition(
                    id,
                    None,
                    Box::new(move |_, ledger| ledger.reject(&lookup, &reason, now)),
                )
                .await?;
                Err(provider_error(e))
            }
            Err(_) => {
                tracing::warn!(payment_id = %id, refund_id = %refund.id, "provider refund timed out, left pending");
                Ok(refund)
            }
        }
    }

    pub async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, AppError> {
        // Verify payment exists first
        let _ = self.load(payment_id).await?;
        self.repo.list_refunds(payment_id).await.map_err(Into::into)
    }

    pub async fn get_refund(&self, id: RefundId) -> Result<Refund, AppError> {
        self.repo
            .get_refund(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Refund {}", id))))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    /// Gets a payment by ID through the cache.
    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        let key = PaymentCache::id_key(id);
        self.cache.get_or_load(&key, || self.load(id)).await
    }

    /// Gets the payment of an order through the cache.
    pub async fn get_payment_by_order(&self, order_id: &str) -> Result<Payment, AppError> {
        let key = PaymentCache::order_key(order_id);
        self.cache
            .get_or_load(&key, || self.load_by_order(order_id))
            .await
    }

    pub async fn list_user_payments(
        &self,
        user_id: &str,
        query: PageQuery,
    ) -> Result<PaymentListResponse, AppError> {
        let (page, limit) = query.resolve();
        let offset = i64::from(page - 1) * i64::from(limit);
        let (payments, total) = self
            .repo
            .list_by_user(user_id, i64::from(limit), offset)
            .await?;

        Ok(PaymentListResponse {
            payments: payments.iter().map(PaymentResponse::from).collect(),
            total,
            page,
            limit,
        })
    }

    pub async fn list_conflicts(&self, limit: i64) -> Result<Vec<ReconciliationConflict>, AppError> {
        self.repo
            .list_conflicts(limit.clamp(1, 500))
            .await
            .map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────────

    /// Loads a payment straight from the repository, bypassing the cache.
    pub(crate) async fn load(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.repo
            .get_payment(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Payment {}", id))))
    }

    async fn load_by_order(&self, order_id: &str) -> Result<Payment, AppError> {
        self.repo
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment for order {}", order_id)))
    }

    async fn record_confirm_conflict(
        &self,
        id: PaymentId,
        intent_id: &str,
        payload: serde_json::Value,
        error: &DomainError,
    ) -> Result<(), AppError> {
        let local_status = self.repo.get_payment(id).await?.map(|p| p.status);
        tracing::warn!(
            payment_id = %id,
            local_status = ?local_status,
            error = %error,
            "provider settled a payment the local state refused"
        );
        let conflict = ReconciliationConflict {
            id: Uuid::new_v4(),
            event_id: format!("confirm:{}", intent_id),
            event_type: "payment_intent.confirm".into(),
            payment_id: Some(id),
            local_status,
            reason: error.to_string(),
            payload,
            created_at: self.clock.now(),
        };
        self.repo.record_conflict(&conflict, None).await?;
        Ok(())
    }

    /// Runs a locked mutation and invalidates the cache once it committed.
    pub(crate) async fn transition(
        &self,
        id: PaymentId,
        dedup_key: Option<&str>,
        mutation: PaymentMutation,
    ) -> Result<MutationOutcome, RepoError> {
        let outcome = self.repo.mutate(id, dedup_key, mutation).await?;
        if let MutationOutcome::Applied {
            payment, events, ..
        } = &outcome
        {
            self.cache.invalidate(payment).await;
            for event in events {
                tracing::info!(payment_id = %payment.id, topic = event.topic(), "payment event enqueued");
            }
        }
        Ok(outcome)
    }

    async fn call_provider<T>(
        &self,
        call: impl Future<Output = T>,
    ) -> Result<T, tokio::time::error::Elapsed> {
        tokio::time::timeout(self.config.request_timeout, call).await
    }
}

/// Maps the provider's view of an intent onto the state machine.
///
/// A status the payment already has is a no-op, so a notification that beat
/// the synchronous answer does not turn into an error.
fn apply_intent_status(
    payment: &mut Payment,
    status: IntentStatus,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<DomainEvent>, DomainError> {
    let event = match status {
        IntentStatus::Processing => match payment.status {
            PaymentStatus::Pending => Some(payment.process(now)?),
            _ => None,
        },
        IntentStatus::RequiresAction => match payment.status {
            PaymentStatus::RequiresAction => None,
            _ => Some(payment.require_action(now)?),
        },
        IntentStatus::Succeeded(charge) => match payment.status {
            PaymentStatus::Succeeded => None,
            _ => Some(payment.succeed(charge, now)?),
        },
        IntentStatus::Failed { code, message } => match payment.status {
            PaymentStatus::Failed => None,
            _ => Some(payment.fail(&code, &message, now)?),
        },
        IntentStatus::Cancelled => payment.cancel(now)?,
    };
    Ok(event.into_iter().collect())
}

fn reuse_for_order(existing: Payment) -> Result<Payment, AppError> {
    if existing.paid_at.is_some() {
        return Err(AppError::BadRequest(format!(
            "Payment already processed for order {}",
            existing.order_id
        )));
    }
    Ok(existing)
}

fn intent_payload(intent_id: &str, status: &IntentStatus) -> serde_json::Value {
    match status {
        IntentStatus::Succeeded(charge) => serde_json::json!({
            "intentId": intent_id,
            "status": "succeeded",
            "charge": charge,
        }),
        IntentStatus::Failed { code, message } => serde_json::json!({
            "intentId": intent_id,
            "status": "failed",
            "code": code,
            "message": message,
        }),
        other => serde_json::json!({
            "intentId": intent_id,
            "status": format!("{:?}", other).to_lowercase(),
        }),
    }
}

fn applied_payment(outcome: MutationOutcome) -> Result<Payment, AppError> {
    match outcome {
        MutationOutcome::Applied { payment, .. } => Ok(payment),
        MutationOutcome::AlreadyProcessed => {
            Err(AppError::Internal("unexpected dedup outcome".into()))
        }
    }
}

fn applied_refund(outcome: MutationOutcome, refund_id: RefundId) -> Result<Refund, AppError> {
    let ledger: RefundLedger = match outcome {
        MutationOutcome::Applied { ledger, .. } => ledger,
        MutationOutcome::AlreadyProcessed => {
            return Err(AppError::Internal("unexpected dedup outcome".into()));
        }
    };
    ledger
        .find(&RefundLookup::Id(refund_id))
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("refund {} vanished", refund_id)))
}

fn provider_error(e: ProviderError) -> AppError {
    AppError::Provider(e.to_string())
}

fn timed_out(_: tokio::time::error::Elapsed) -> AppError {
    AppError::Provider("provider request timed out".into())
}
