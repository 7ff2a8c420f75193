//! PaymentService tests against the in-memory adapters.

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use payments_types::domain::topics;
    use payments_types::ports::{
        CacheStore, CreatedIntent, IntentStatus, PaymentProvider, ProviderError,
    };
    use payments_types::{
        AppError, ChargeDetails, Clock, ConfirmPaymentRequest, CreatePaymentRequest,
        CreateRefundRequest, DomainError, Money, NotificationKind, Payment, PaymentId,
        PaymentMethod, PaymentRepository, PaymentStatus, ProviderKind, ProviderNotification,
        RefundLookup, RefundReason, RefundStatus, WebhookAck,
    };

    use crate::cache::{DEFAULT_TTL, PaymentCache};
    use crate::outbound::{InMemoryBus, InMemoryCache, InMemoryStore, SimulatedProvider};
    use crate::relay::{OutboxRelay, RelayConfig};
    use crate::service::ServiceConfig;
    use crate::PaymentService;

    /// Clock that only moves when told to.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(start: &str) -> Self {
            Self(Mutex::new(start.parse().unwrap()))
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        service: PaymentService<InMemoryStore>,
        store: InMemoryStore,
        provider: Arc<SimulatedProvider>,
        cache: Arc<InMemoryCache>,
        clock: Arc<FixedClock>,
    }

    fn harness() -> Harness {
        harness_with(ServiceConfig::default())
    }

    fn harness_with(config: ServiceConfig) -> Harness {
        let store = InMemoryStore::new();
        let provider = Arc::new(SimulatedProvider::default());
        let cache = Arc::new(InMemoryCache::new());
        let clock = Arc::new(FixedClock::new("2026-03-01T12:00:00Z"));
        let service = PaymentService::new(
            store.clone(),
            provider.clone(),
            PaymentCache::new(cache.clone() as Arc<dyn CacheStore>, DEFAULT_TTL),
        )
        .with_clock(clock.clone())
        .with_config(config);
        Harness {
            service,
            store,
            provider,
            cache,
            clock,
        }
    }

    fn create_request(order_id: &str, amount: i64) -> CreatePaymentRequest {
        CreatePaymentRequest {
            order_id: order_id.into(),
            user_id: "user-1".into(),
            amount,
            currency: "USD".into(),
            payment_method: PaymentMethod::CreditCard,
            provider: None,
            description: None,
            receipt_email: None,
            metadata: None,
        }
    }

    fn confirm_with(method: &str) -> ConfirmPaymentRequest {
        ConfirmPaymentRequest {
            payment_method_id: method.into(),
        }
    }

    fn refund_request(amount: i64) -> CreateRefundRequest {
        CreateRefundRequest {
            amount,
            reason: RefundReason::CustomerRequest,
            notes: None,
            requested_by: Some("support-7".into()),
            metadata: None,
        }
    }

    fn notification(event_id: &str, payment: &Payment, kind: NotificationKind) -> ProviderNotification {
        ProviderNotification {
            event_id: event_id.into(),
            event_type: "test.event".into(),
            reference: payment.payment_intent_id.clone(),
            kind,
            payload: serde_json::json!({ "id": event_id }),
        }
    }

    async fn paid_payment(h: &Harness, order_id: &str, amount: i64) -> Payment {
        let payment = h
            .service
            .create_payment(create_request(order_id, amount))
            .await
            .unwrap();
        h.service
            .confirm_payment(payment.id, confirm_with("pm_card_visa"))
            .await
            .unwrap()
    }

    async fn settle_refund(h: &Harness, event_id: &str, payment: &Payment, refund_id: payments_types::RefundId) -> WebhookAck {
        h.service
            .handle_notification(notification(
                event_id,
                payment,
                NotificationKind::RefundSucceeded {
                    refund: RefundLookup::Id(refund_id),
                    provider_refund_id: format!("re_{}", event_id),
                },
            ))
            .await
            .unwrap()
    }

    fn topics_of(outbox: &[payments_types::OutboxEvent]) -> Vec<&str> {
        outbox.iter().map(|e| e.topic.as_str()).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_then_confirm_succeeds() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount.amount(), 10000);
        assert!(payment.payment_intent_id.is_some());

        let paid = h
            .service
            .confirm_payment(payment.id, confirm_with("pm_card_visa"))
            .await
            .unwrap();
        assert_eq!(paid.status, PaymentStatus::Succeeded);
        assert_eq!(paid.paid_at, Some(h.clock.now()));
        assert!(paid.provider_payment_id.is_some());

        let outbox = h.store.outbox().await;
        assert_eq!(
            topics_of(&outbox),
            vec![topics::PAYMENT_INITIATED, topics::PAYMENT_SUCCEEDED]
        );
    }

    #[tokio::test]
    async fn test_success_notification_sets_provider_payment_id() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let ack = h
            .service
            .handle_notification(notification(
                "evt_1",
                &payment,
                NotificationKind::PaymentSucceeded(ChargeDetails::new("pi_1")),
            ))
            .await
            .unwrap();
        assert_eq!(ack, WebhookAck::Applied);

        let stored = h.service.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("pi_1"));
        assert!(stored.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let h = harness();

        let mut req = create_request("order-1", 10000);
        req.currency = "XYZ".into();
        assert!(matches!(
            h.service.create_payment(req).await,
            Err(AppError::BadRequest(_))
        ));

        assert!(matches!(
            h.service.create_payment(create_request("order-2", -5)).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(h.store.outbox().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_for_same_order_returns_existing() {
        let h = harness();
        let first = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        let second = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.store.outbox().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_for_paid_order_is_rejected() {
        let h = harness();
        paid_payment(&h, "order-1", 10000).await;

        let result = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_declined_confirmation_fails_payment() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let failed = h
            .service
            .confirm_payment(payment.id, confirm_with("fail_card"))
            .await
            .unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.failure_code.as_deref(), Some("card_declined"));
        assert!(failed.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_confirm_timeout_leaves_payment_processing() {
        let h = harness_with(ServiceConfig {
            request_timeout: Duration::from_millis(20),
            ..ServiceConfig::default()
        });
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let processing = h
            .service
            .confirm_payment(payment.id, confirm_with("slow_card"))
            .await
            .unwrap();
        assert_eq!(processing.status, PaymentStatus::Processing);

        // The provider settles later through a notification.
        let ack = h
            .service
            .handle_notification(notification(
                "evt_late",
                &processing,
                NotificationKind::PaymentSucceeded(ChargeDetails::new("ch_late")),
            ))
            .await
            .unwrap();
        assert_eq!(ack, WebhookAck::Applied);
        assert_eq!(
            h.service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_cancel_pending_and_succeeded() {
        let h = harness();
        let pending = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let cancelled = h.service.cancel_payment(pending.id).await.unwrap();
        assert_eq!(cancelled.status, PaymentStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        // Cancelling again is a no-op.
        let again = h.service.cancel_payment(pending.id).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Cancelled);
        assert_eq!(again.cancelled_at, cancelled.cancelled_at);

        let paid = paid_payment(&h, "order-2", 10000).await;
        let result = h.service.cancel_payment(paid.id).await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::InvalidTransition { .. }))
        ));
        assert_eq!(
            h.service.get_payment(paid.id).await.unwrap().status,
            PaymentStatus::Succeeded
        );

        let cancelled_events = h
            .store
            .outbox()
            .await
            .into_iter()
            .filter(|e| e.topic == topics::PAYMENT_CANCELLED)
            .count();
        assert_eq!(cancelled_events, 1);
    }

    #[tokio::test]
    async fn test_get_missing_payment() {
        let h = harness();
        let result = h.service.get_payment(payments_types::PaymentId::new()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_is_invalidated_on_change() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        // Populate both cache entries.
        h.service.get_payment(payment.id).await.unwrap();
        h.service.get_payment_by_order("order-1").await.unwrap();
        assert_eq!(h.cache.len(), 2);

        h.service
            .confirm_payment(payment.id, confirm_with("pm_card_visa"))
            .await
            .unwrap();
        assert!(h.cache.get(&PaymentCache::id_key(payment.id)).await.unwrap().is_none());
        assert!(h.cache.get(&PaymentCache::order_key("order-1")).await.unwrap().is_none());

        assert_eq!(
            h.service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Succeeded
        );
        assert_eq!(
            h.service
                .get_payment_by_order("order-1")
                .await
                .unwrap()
                .status,
            PaymentStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_list_user_payments_pages() {
        let h = harness();
        for i in 0..3 {
            h.service
                .create_payment(create_request(&format!("order-{}", i), 1000))
                .await
                .unwrap();
            h.clock.advance(chrono::Duration::seconds(1));
        }

        let page = h
            .service
            .list_user_payments(
                "user-1",
                payments_types::PageQuery {
                    page: Some(1),
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.payments.len(), 2);
        assert_eq!(page.payments[0].order_id, "order-2");
    }

    #[tokio::test]
    async fn test_outbox_failure_leaves_payment_unchanged() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        h.store.set_fail_outbox_writes(true);
        let result = h
            .service
            .confirm_payment(payment.id, confirm_with("pm_card_visa"))
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        h.store.set_fail_outbox_writes(false);

        let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(h.store.outbox().await.len(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_partial_then_full_refund() {
        let h = harness();
        let payment = paid_payment(&h, "order-1", 10000).await;

        let first = h
            .service
            .request_refund(payment.id, refund_request(4000))
            .await
            .unwrap();
        assert_eq!(first.status, RefundStatus::Pending);
        assert!(first.provider_refund_id.is_some());
        assert_eq!(
            settle_refund(&h, "evt_r1", &payment, first.id).await,
            WebhookAck::Applied
        );

        let stored = h.service.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.refunded_amount.amount(), 4000);
        assert_eq!(stored.status, PaymentStatus::PartiallyRefunded);

        let second = h
            .service
            .request_refund(payment.id, refund_request(6000))
            .await
            .unwrap();
        settle_refund(&h, "evt_r2", &payment, second.id).await;

        let stored = h.service.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.refunded_amount.amount(), 10000);
        assert_eq!(stored.status, PaymentStatus::Refunded);

        let result = h
            .service
            .request_refund(payment.id, refund_request(1))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::RefundExceedsAmount { .. }))
        ));

        let refunds = h.service.list_refunds(payment.id).await.unwrap();
        assert_eq!(refunds.len(), 2);
        assert!(refunds.iter().all(|r| r.status == RefundStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_pending_refunds_reserve_the_amount() {
        let h = harness();
        let payment = paid_payment(&h, "order-1", 10000).await;

        h.service
            .request_refund(payment.id, refund_request(7000))
            .await
            .unwrap();
        let result = h
            .service
            .request_refund(payment.id, refund_request(4000))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::RefundExceedsAmount {
                refundable: 3000,
                ..
            }))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refunds_never_exceed_amount() {
        let h = Arc::new(harness());
        let payment = paid_payment(&h, "order-1", 10000).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.service
                    .request_refund(payment.id, refund_request(4000))
                    .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(AppError::Rejected(DomainError::RefundExceedsAmount { .. })) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(accepted, 2);

        let refunds = h.service.list_refunds(payment.id).await.unwrap();
        let reserved: i64 = refunds.iter().map(|r| r.amount.amount()).sum();
        assert_eq!(refunds.len(), 2);
        assert!(reserved <= 10000);
    }

    #[tokio::test]
    async fn test_refund_of_unpaid_payment_is_rejected() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let result = h
            .service
            .request_refund(payment.id, refund_request(100))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::NotRefundable(
                PaymentStatus::Pending
            )))
        ));
    }

    #[tokio::test]
    async fn test_refund_window_expires() {
        let h = harness();
        let payment = paid_payment(&h, "order-1", 10000).await;

        h.clock.advance(chrono::Duration::days(31));
        let result = h
            .service
            .request_refund(payment.id, refund_request(100))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::RefundWindowExpired { days: 30 }))
        ));
    }

    #[tokio::test]
    async fn test_provider_refusal_fails_the_refund() {
        let h = harness();
        let payment = paid_payment(&h, "order-1", 10000).await;
        h.provider.set_fail_refunds(true);

        let result = h
            .service
            .request_refund(payment.id, refund_request(4000))
            .await;
        assert!(matches!(result, Err(AppError::Provider(_))));

        let refunds = h.service.list_refunds(payment.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, RefundStatus::Failed);

        // Nothing was refunded, so the full amount is available again.
        h.provider.set_fail_refunds(false);
        h.service
            .request_refund(payment.id, refund_request(10000))
            .await
            .unwrap();

        let outbox = h.store.outbox().await;
        assert!(topics_of(&outbox).contains(&topics::REFUND_FAILED));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_duplicate_notification_publishes_once() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        let success = notification(
            "evt_1",
            &payment,
            NotificationKind::PaymentSucceeded(ChargeDetails::new("pi_1")),
        );

        let first = h.service.handle_notification(success.clone()).await.unwrap();
        let second = h.service.handle_notification(success).await.unwrap();
        assert_eq!(first, WebhookAck::Applied);
        assert_eq!(second, WebhookAck::Duplicate);

        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(
            h.store.clone(),
            Arc::new(bus.clone()),
            RelayConfig::default(),
        );
        let report = relay.run_once().await.unwrap();
        assert!(report.is_clean());
        // A second round finds nothing left to send.
        assert_eq!(relay.run_once().await.unwrap().published, 0);

        assert_eq!(bus.messages_for(topics::PAYMENT_SUCCEEDED).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_notifications() {
        let h = Arc::new(harness());
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        let success = notification(
            "evt_1",
            &payment,
            NotificationKind::PaymentSucceeded(ChargeDetails::new("pi_1")),
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let h = h.clone();
            let n = success.clone();
            handles.push(tokio::spawn(async move {
                h.service.handle_notification(n).await.unwrap()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() == WebhookAck::Applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let succeeded = h
            .store
            .outbox()
            .await
            .into_iter()
            .filter(|e| e.topic == topics::PAYMENT_SUCCEEDED)
            .count();
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn test_success_after_cancel_is_a_conflict() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        h.service.cancel_payment(payment.id).await.unwrap();

        let late = notification(
            "evt_late",
            &payment,
            NotificationKind::PaymentSucceeded(ChargeDetails::new("ch_1")),
        );
        assert_eq!(
            h.service.handle_notification(late.clone()).await.unwrap(),
            WebhookAck::Conflict
        );
        assert_eq!(
            h.service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Cancelled
        );

        let conflicts = h.service.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].event_id, "evt_late");
        assert_eq!(conflicts[0].local_status, Some(PaymentStatus::Cancelled));

        // The retry is recognised and not logged twice.
        assert_eq!(
            h.service.handle_notification(late).await.unwrap(),
            WebhookAck::Duplicate
        );
        assert_eq!(h.service.list_conflicts(10).await.unwrap().len(), 1);
    }

    /// Provider that lets the payment be cancelled locally while a
    /// confirmation is in flight, then reports the charge as settled.
    struct CancelledMidConfirm {
        inner: SimulatedProvider,
        store: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl PaymentProvider for CancelledMidConfirm {
        fn kind(&self) -> ProviderKind {
            self.inner.kind()
        }

        async fn create_intent(
            &self,
            payment_id: PaymentId,
            order_id: &str,
            amount: Money,
        ) -> Result<CreatedIntent, ProviderError> {
            self.inner.create_intent(payment_id, order_id, amount).await
        }

        async fn confirm_intent(
            &self,
            intent_id: &str,
            payment_method_id: &str,
        ) -> Result<IntentStatus, ProviderError> {
            if let Ok(Some(payment)) = self.store.find_by_provider_reference(intent_id).await {
                self.store
                    .mutate(
                        payment.id,
                        None,
                        Box::new(|p, _| Ok(p.cancel(Utc::now())?.into_iter().collect())),
                    )
                    .await
                    .unwrap();
            }
            self.inner.confirm_intent(intent_id, payment_method_id).await
        }

        async fn cancel_intent(&self, intent_id: &str) -> Result<(), ProviderError> {
            self.inner.cancel_intent(intent_id).await
        }

        async fn create_refund(
            &self,
            intent_id: &str,
            amount: Money,
            refund_id: payments_types::RefundId,
        ) -> Result<String, ProviderError> {
            self.inner.create_refund(intent_id, amount, refund_id).await
        }
    }

    #[tokio::test]
    async fn test_settled_confirmation_against_cancelled_payment_is_logged() {
        let store = InMemoryStore::new();
        let service = PaymentService::new(
            store.clone(),
            Arc::new(CancelledMidConfirm {
                inner: SimulatedProvider::default(),
                store: store.clone(),
            }),
            PaymentCache::new(Arc::new(InMemoryCache::new()), DEFAULT_TTL),
        );
        let payment = service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();

        let result = service
            .confirm_payment(payment.id, confirm_with("pm_card_visa"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Rejected(DomainError::InvalidTransition {
                from: PaymentStatus::Cancelled,
                ..
            }))
        ));

        let conflicts = service.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].payment_id, Some(payment.id));
        assert_eq!(conflicts[0].local_status, Some(PaymentStatus::Cancelled));
        assert_eq!(conflicts[0].event_type, "payment_intent.confirm");
        assert_eq!(conflicts[0].payload["status"], "succeeded");
        assert_eq!(
            service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_failed_conflict_write_is_retried() {
        let h = harness();
        let payment = h
            .service
            .create_payment(create_request("order-1", 10000))
            .await
            .unwrap();
        h.service.cancel_payment(payment.id).await.unwrap();

        let late = notification(
            "evt_late",
            &payment,
            NotificationKind::PaymentSucceeded(ChargeDetails::new("ch_1")),
        );
        h.store.set_fail_conflict_writes(true);
        assert!(h.service.handle_notification(late.clone()).await.is_err());
        assert!(h.service.list_conflicts(10).await.unwrap().is_empty());

        // Nothing was recorded, so the provider's retry is logged.
        h.store.set_fail_conflict_writes(false);
        assert_eq!(
            h.service.handle_notification(late).await.unwrap(),
            WebhookAck::Conflict
        );
        let conflicts = h.service.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].event_id, "evt_late");
    }

    #[tokio::test]
    async fn test_unknown_and_unsupported_notifications() {
        let h = harness();

        let unknown = ProviderNotification {
            event_id: "evt_x".into(),
            event_type: "payment_intent.succeeded".into(),
            reference: Some("pi_nobody".into()),
            kind: NotificationKind::PaymentSucceeded(ChargeDetails::new("ch_x")),
            payload: serde_json::json!({}),
        };
        assert_eq!(
            h.service.handle_notification(unknown.clone()).await.unwrap(),
            WebhookAck::UnknownPayment
        );
        assert_eq!(
            h.service.handle_notification(unknown).await.unwrap(),
            WebhookAck::Duplicate
        );

        let other = ProviderNotification {
            event_id: "evt_y".into(),
            event_type: "customer.created".into(),
            reference: None,
            kind: NotificationKind::Unsupported,
            payload: serde_json::json!({}),
        };
        assert_eq!(
            h.service.handle_notification(other).await.unwrap(),
            WebhookAck::Ignored
        );
    }

    #[tokio::test]
    async fn test_refund_failure_notification() {
        let h = harness();
        let payment = paid_payment(&h, "order-1", 10000).await;
        let refund = h
            .service
            .request_refund(payment.id, refund_request(2500))
            .await
            .unwrap();

        let ack = h
            .service
            .handle_notification(notification(
                "evt_rf",
                &payment,
                NotificationKind::RefundFailed {
                    refund: RefundLookup::Id(refund.id),
                    reason: "insufficient_funds".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(ack, WebhookAck::Applied);

        let stored = h.service.get_refund(refund.id).await.unwrap();
        assert_eq!(stored.status, RefundStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("insufficient_funds"));
        let payment = h.service.get_payment(payment.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.refunded_amount.amount(), 0);

        // A later success for the same refund cannot resurrect it.
        assert_eq!(
            settle_refund(&h, "evt_rs", &payment, refund.id).await,
            WebhookAck::Conflict
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbox relay
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_relay_retries_without_reordering_a_payment() {
        let h = harness();
        let a = h
            .service
            .create_payment(create_request("order-a", 1000))
            .await
            .unwrap();
        let b = h
            .service
            .create_payment(create_request("order-b", 1000))
            .await
            .unwrap();
        h.service
            .confirm_payment(a.id, confirm_with("pm_card_visa"))
            .await
            .unwrap();
        h.service
            .confirm_payment(b.id, confirm_with("pm_card_visa"))
            .await
            .unwrap();

        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(
            h.store.clone(),
            Arc::new(bus.clone()),
            RelayConfig::default(),
        );

        // Each batch acknowledges one message: b's initiation fails, so b's
        // success must wait.
        bus.fail_after(Some(1)).await;
        let report = relay.run_once().await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);

        bus.fail_after(None).await;
        let report = relay.run_once().await.unwrap();
        assert_eq!(report.published, 2);
        assert!(report.is_clean());

        let b_key = b.id.to_string();
        let b_topics: Vec<String> = bus
            .messages()
            .await
            .into_iter()
            .filter(|m| m.key == b_key)
            .map(|m| m.topic)
            .collect();
        assert_eq!(
            b_topics,
            vec![
                topics::PAYMENT_INITIATED.to_string(),
                topics::PAYMENT_SUCCEEDED.to_string()
            ]
        );

        let failed_once = h
            .store
            .outbox()
            .await
            .into_iter()
            .find(|e| e.partition_key == b_key && e.topic == topics::PAYMENT_INITIATED)
            .unwrap();
        assert_eq!(failed_once.attempts, 1);
        assert!(failed_once.published_at.is_some());
    }

    #[tokio::test]
    async fn test_relay_stops_on_shutdown() {
        let h = harness();
        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(
            h.store.clone(),
            Arc::new(bus.clone()),
            RelayConfig {
                poll_interval: Duration::from_millis(10),
                ..RelayConfig::default()
            },
        );
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(relay.run(rx));

        h.service
            .create_payment(create_request("order-1", 1000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bus.messages_for(topics::PAYMENT_INITIATED).await.len(), 1);
    }
}
