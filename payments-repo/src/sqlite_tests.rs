//! SQLite repository integration tests.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use payments_types::ports::MutationOutcome;
    use payments_types::{
        ChargeDetails, Currency, DomainError, DomainEvent, IdempotencyStore, Money, NewPayment,
        OutboxStore, Payment, PaymentId, PaymentMethod, PaymentRepository, PaymentStatus,
        ProviderKind, ReconciliationConflict, RefundLookup, RefundReason, RefundRequest,
        RefundStatus, RepoError,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::SqliteRepo;

    async fn setup_repo() -> SqliteRepo {
        SqliteRepo::new("sqlite::memory:").await.unwrap()
    }

    fn new_payment(order_id: &str, user_id: &str) -> (Payment, DomainEvent) {
        Payment::create(
            NewPayment {
                order_id: order_id.into(),
                user_id: user_id.into(),
                amount: Money::new(10_000, Currency::USD).unwrap(),
                method: PaymentMethod::CreditCard,
                provider: ProviderKind::Stripe,
                payment_intent_id: Some(format!("pi_{}", order_id)),
                provider_customer_id: None,
                description: Some("Order".into()),
                receipt_email: None,
                metadata: serde_json::json!({"source": "test"}),
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn insert(repo: &SqliteRepo, order_id: &str) -> Payment {
        let (payment, event) = new_payment(order_id, "user-1");
        repo.insert_payment(&payment, vec![event]).await.unwrap();
        payment
    }

    async fn succeed(repo: &SqliteRepo, id: PaymentId) {
        repo.mutate(
            id,
            None,
            Box::new(|p, _| Ok(vec![p.succeed(ChargeDetails::new("ch_1"), Utc::now())?])),
        )
        .await
        .unwrap();
    }

    async fn unpublished(repo: &SqliteRepo) -> Vec<String> {
        repo.fetch_unpublished(100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.topic)
            .collect()
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;

        let fetched = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, payment.id);
        assert_eq!(fetched.status, PaymentStatus::Pending);
        assert_eq!(fetched.amount.amount(), 10_000);
        assert_eq!(fetched.metadata["source"], "test");

        let by_order = repo.find_by_order_id("order-1").await.unwrap().unwrap();
        assert_eq!(by_order.id, payment.id);

        let by_intent = repo
            .find_by_provider_reference("pi_order-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_intent.id, payment.id);

        assert!(repo.get_payment(PaymentId::new()).await.unwrap().is_none());
        assert_eq!(unpublished(&repo).await, vec!["payment.initiated"]);
    }

    #[tokio::test]
    async fn test_duplicate_order_is_conflict() {
        let repo = setup_repo().await;
        insert(&repo, "order-1").await;

        let (dup, event) = new_payment("order-1", "user-2");
        let result = repo.insert_payment(&dup, vec![event]).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
        assert_eq!(unpublished(&repo).await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutate_persists_state_and_outbox() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;

        succeed(&repo, payment.id).await;

        let fetched = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PaymentStatus::Succeeded);
        assert!(fetched.paid_at.is_some());
        assert_eq!(fetched.provider_payment_id.as_deref(), Some("ch_1"));
        assert_eq!(
            repo.find_by_provider_reference("ch_1")
                .await
                .unwrap()
                .map(|p| p.id),
            Some(payment.id)
        );

        assert_eq!(
            unpublished(&repo).await,
            vec!["payment.initiated", "payment.succeeded"]
        );
    }

    #[tokio::test]
    async fn test_mutate_with_dedup_key_runs_once() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;

        for _ in 0..2 {
            let _ = repo
                .mutate(
                    payment.id,
                    Some("evt_1"),
                    Box::new(|p, _| Ok(vec![p.succeed(ChargeDetails::new("ch_1"), Utc::now())?])),
                )
                .await;
        }

        let third = repo
            .mutate(
                payment.id,
                Some("evt_1"),
                Box::new(|_, _| panic!("must not run for a processed key")),
            )
            .await
            .unwrap();
        assert!(matches!(third, MutationOutcome::AlreadyProcessed));
        assert!(repo.is_processed("evt_1").await.unwrap());

        let topics = unpublished(&repo).await;
        assert_eq!(
            topics.iter().filter(|t| *t == "payment.succeeded").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejected_mutation_rolls_back_everything() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;
        succeed(&repo, payment.id).await;

        let result = repo
            .mutate(
                payment.id,
                Some("evt_cancel"),
                Box::new(|p, _| Ok(p.cancel(Utc::now())?.into_iter().collect())),
            )
            .await;
        assert!(matches!(
            result,
            Err(RepoError::Domain(DomainError::InvalidTransition { .. }))
        ));

        let fetched = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PaymentStatus::Succeeded);
        assert!(!repo.is_processed("evt_cancel").await.unwrap());
        assert_eq!(unpublished(&repo).await.len(), 2);
    }

    #[tokio::test]
    async fn test_outbox_failure_rolls_back_state_change() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;

        sqlx::query("DROP TABLE outbox_events")
            .execute(repo.pool())
            .await
            .unwrap();

        let result = repo
            .mutate(
                payment.id,
                Some("evt_fault"),
                Box::new(|p, _| Ok(vec![p.succeed(ChargeDetails::new("ch_1"), Utc::now())?])),
            )
            .await;
        assert!(matches!(result, Err(RepoError::Database(_))));

        let fetched = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PaymentStatus::Pending);
        assert!(fetched.paid_at.is_none());
        assert!(!repo.is_processed("evt_fault").await.unwrap());
    }

    #[tokio::test]
    async fn test_mutate_missing_payment() {
        let repo = setup_repo().await;
        let result = repo
            .mutate(PaymentId::new(), None, Box::new(|_, _| Ok(Vec::new())))
            .await;
        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_refund_ledger_round_trip() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;
        succeed(&repo, payment.id).await;

        let outcome = repo
            .mutate(
                payment.id,
                None,
                Box::new(|p, ledger| {
                    let request = RefundRequest {
                        amount: Money::new(4_000, Currency::USD)?,
                        reason: RefundReason::ProductDefective,
                        notes: Some("cracked".into()),
                        requested_by: Some("agent-7".into()),
                        metadata: serde_json::json!({}),
                    };
                    let (_, event) = ledger.open(p, request, Utc::now(), Duration::days(30))?;
                    Ok(vec![event])
                }),
            )
            .await
            .unwrap();
        let refund = match outcome {
            MutationOutcome::Applied { ledger, .. } => ledger.refunds[0].clone(),
            MutationOutcome::AlreadyProcessed => panic!("no dedup key given"),
        };

        let stored = repo.get_refund(refund.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RefundStatus::Pending);
        assert_eq!(stored.reason, RefundReason::ProductDefective);
        assert_eq!(stored.notes.as_deref(), Some("cracked"));

        let refund_id = refund.id;
        repo.mutate(
            payment.id,
            Some("evt_refund"),
            Box::new(move |p, ledger| {
                ledger.confirm(
                    p,
                    &RefundLookup::Id(refund_id),
                    Some("re_1".into()),
                    None,
                    Utc::now(),
                )
            }),
        )
        .await
        .unwrap();

        let fetched = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(fetched.refunded_amount.amount(), 4_000);

        let refunds = repo.list_refunds(payment.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, RefundStatus::Succeeded);
        assert_eq!(refunds[0].provider_refund_id.as_deref(), Some("re_1"));
        assert!(refunds[0].refunded_at.is_some());

        assert_eq!(
            unpublished(&repo).await,
            vec![
                "payment.initiated",
                "payment.succeeded",
                "refund.initiated",
                "payment.refunded"
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_mark_processed() {
        let repo = Arc::new(setup_repo().await);

        let mut handles = vec![];
        for _ in 0..10 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.mark_processed("evt_race").await.unwrap()
            }));
        }

        let mut firsts = 0;
        for handle in handles {
            if handle.await.unwrap() {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
        assert!(repo.is_processed("evt_race").await.unwrap());
        assert!(!repo.is_processed("evt_other").await.unwrap());
    }

    #[tokio::test]
    async fn test_outbox_publish_bookkeeping() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;
        succeed(&repo, payment.id).await;

        let rows = repo.fetch_unpublished(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id < rows[1].id);
        assert_eq!(rows[0].partition_key, payment.id.to_string());

        repo.record_publish_failure(&[rows[1].id], "broker down")
            .await
            .unwrap();
        repo.mark_published(&[rows[0].id]).await.unwrap();

        let remaining = repo.fetch_unpublished(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, rows[1].id);
        assert_eq!(remaining[0].attempts, 1);
        assert_eq!(remaining[0].last_error.as_deref(), Some("broker down"));
    }

    #[tokio::test]
    async fn test_list_by_user_paginates_newest_first() {
        let repo = setup_repo().await;
        for i in 0..5 {
            let (mut payment, event) = new_payment(&format!("order-{}", i), "user-9");
            payment.created_at = Utc::now() + Duration::seconds(i);
            repo.insert_payment(&payment, vec![event]).await.unwrap();
        }
        insert(&repo, "someone-else").await;

        let (page, total) = repo.list_by_user("user-9", 2, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].order_id, "order-4");
        assert_eq!(page[1].order_id, "order-3");

        let (last, _) = repo.list_by_user("user-9", 2, 4).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].order_id, "order-0");
    }

    #[tokio::test]
    async fn test_conflict_log() {
        let repo = setup_repo().await;
        let payment = insert(&repo, "order-1").await;

        let conflict = ReconciliationConflict {
            id: Uuid::new_v4(),
            event_id: "evt_9".into(),
            event_type: "payment_intent.succeeded".into(),
            payment_id: Some(payment.id),
            local_status: Some(PaymentStatus::Cancelled),
            reason: "Cannot succeed a payment in status CANCELLED".into(),
            payload: serde_json::json!({"id": "evt_9"}),
            created_at: Utc::now(),
        };
        assert!(repo.record_conflict(&conflict, None).await.unwrap());

        let listed = repo.list_conflicts(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, "evt_9");
        assert_eq!(listed[0].payment_id, Some(payment.id));
        assert_eq!(listed[0].local_status, Some(PaymentStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_conflict_and_dedup_key_commit_together() {
        let repo = setup_repo().await;
        let conflict = ReconciliationConflict {
            id: Uuid::new_v4(),
            event_id: "evt_late".into(),
            event_type: "payment_intent.succeeded".into(),
            payment_id: None,
            local_status: None,
            reason: "late success".into(),
            payload: serde_json::json!({"id": "evt_late"}),
            created_at: Utc::now(),
        };

        assert!(
            repo.record_conflict(&conflict, Some("evt_late"))
                .await
                .unwrap()
        );
        assert!(repo.is_processed("evt_late").await.unwrap());

        let retried = ReconciliationConflict {
            id: Uuid::new_v4(),
            ..conflict.clone()
        };
        assert!(
            !repo.record_conflict(&retried, Some("evt_late"))
                .await
                .unwrap()
        );
        assert_eq!(repo.list_conflicts(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_conflict_insert_keeps_event_unprocessed() {
        let repo = setup_repo().await;
        sqlx::query("DROP TABLE reconciliation_conflicts")
            .execute(repo.pool())
            .await
            .unwrap();

        let conflict = ReconciliationConflict {
            id: Uuid::new_v4(),
            event_id: "evt_lost".into(),
            event_type: "payment_intent.succeeded".into(),
            payment_id: None,
            local_status: None,
            reason: "late success".into(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        };
        let result = repo.record_conflict(&conflict, Some("evt_lost")).await;
        assert!(matches!(result, Err(RepoError::Database(_))));
        assert!(!repo.is_processed("evt_lost").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refunds_never_exceed_amount() {
        let repo = Arc::new(setup_repo().await);
        let payment = insert(&repo, "order-1").await;
        succeed(&repo, payment.id).await;

        let mut handles = vec![];
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.mutate(
                    payment.id,
                    None,
                    Box::new(|p, ledger| {
                        let request = RefundRequest {
                            amount: Money::new(4_000, Currency::USD)?,
                            reason: RefundReason::CustomerRequest,
                            notes: None,
                            requested_by: None,
                            metadata: serde_json::json!({}),
                        };
                        let (_, event) = ledger.open(p, request, Utc::now(), Duration::days(30))?;
                        Ok(vec![event])
                    }),
                )
                .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(RepoError::Domain(DomainError::RefundExceedsAmount { .. })) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(accepted, 2);

        let refunds = repo.list_refunds(payment.id).await.unwrap();
        let reserved: i64 = refunds.iter().map(|r| r.amount.amount()).sum();
        assert_eq!(refunds.len(), 2);
        assert!(reserved <= 10_000);
    }
}
