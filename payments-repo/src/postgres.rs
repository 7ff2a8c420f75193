//! PostgreSQL repository adapter.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use payments_types::domain::{NewOutboxEvent, OutboxEvent};
use payments_types::ports::{MutationOutcome, PaymentMutation};
use payments_types::{
    DomainEvent, IdempotencyStore, OutboxStore, Payment, PaymentId, PaymentRepository,
    ReconciliationConflict, Refund, RefundId, RefundLedger, RepoError,
};

use crate::types::{
    DbConflict, DbCount, DbOutboxEvent, DbPayment, DbRefund, conflict_columns, outbox_columns,
    payment_columns, refund_columns,
};

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL Repository
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL repository with row-level locking.
#[derive(Clone)]
pub struct PostgresRepo {
    pool: PgPool,
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

/// Runs all database migrations.
async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    execute_migration(
        pool,
        include_str!("../migrations/0001_create_payments_pg.sql"),
        "0001",
    )
    .await?;

    execute_migration(
        pool,
        include_str!("../migrations/0002_create_event_tables_pg.sql"),
        "0002",
    )
    .await?;

    Ok(())
}

impl PostgresRepo {
    /// Creates a new PostgreSQL repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row writers (shared by insert and mutate)
// ─────────────────────────────────────────────────────────────────────────────

async fn insert_payment_row(conn: &mut PgConnection, p: &Payment) -> Result<(), sqlx::Error> {
    let card = p.card.as_ref();
    sqlx::query(
        r#"INSERT INTO payments (id, order_id, user_id, amount, refunded_amount, currency,
               payment_method, provider, status, payment_intent_id, provider_payment_id,
               provider_customer_id, card_last4, card_brand, card_exp_month, card_exp_year,
               description, receipt_email, receipt_url, metadata, failure_code, failure_message,
               paid_at, failed_at, cancelled_at, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                   $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)"#,
    )
    .bind(p.id.into_uuid())
    .bind(&p.order_id)
    .bind(&p.user_id)
    .bind(p.amount.amount())
    .bind(p.refunded_amount.amount())
    .bind(p.currency().code())
    .bind(p.method.as_str())
    .bind(p.provider.as_str())
    .bind(p.status.as_str())
    .bind(&p.payment_intent_id)
    .bind(&p.provider_payment_id)
    .bind(&p.provider_customer_id)
    .bind(card.map(|c| c.last4.clone()))
    .bind(card.map(|c| c.brand.clone()))
    .bind(card.map(|c| c.exp_month))
    .bind(card.map(|c| c.exp_year))
    .bind(&p.description)
    .bind(&p.receipt_email)
    .bind(&p.receipt_url)
    .bind(&p.metadata)
    .bind(&p.failure_code)
    .bind(&p.failure_message)
    .bind(p.paid_at)
    .bind(p.failed_at)
    .bind(p.cancelled_at)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_payment_row(conn: &mut PgConnection, p: &Payment) -> Result<(), RepoError> {
    let card = p.card.as_ref();
    sqlx::query(
        r#"UPDATE payments SET refunded_amount = $2, status = $3, payment_intent_id = $4,
               provider_payment_id = $5, provider_customer_id = $6, card_last4 = $7,
               card_brand = $8, card_exp_month = $9, card_exp_year = $10, receipt_url = $11,
               failure_code = $12, failure_message = $13, paid_at = $14, failed_at = $15,
               cancelled_at = $16, updated_at = $17
           WHERE id = $1"#,
    )
    .bind(p.id.into_uuid())
    .bind(p.refunded_amount.amount())
    .bind(p.status.as_str())
    .bind(&p.payment_intent_id)
    .bind(&p.provider_payment_id)
    .bind(&p.provider_customer_id)
    .bind(card.map(|c| c.last4.clone()))
    .bind(card.map(|c| c.brand.clone()))
    .bind(card.map(|c| c.exp_month))
    .bind(card.map(|c| c.exp_year))
    .bind(&p.receipt_url)
    .bind(&p.failure_code)
    .bind(&p.failure_message)
    .bind(p.paid_at)
    .bind(p.failed_at)
    .bind(p.cancelled_at)
    .bind(p.updated_at)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn upsert_refund_row(conn: &mut PgConnection, r: &Refund) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO refunds (id, payment_id, amount, currency, status, reason, notes,
               provider_refund_id, failure_reason, requested_by, processed_by, metadata,
               refunded_at, failed_at, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
           ON CONFLICT (id) DO UPDATE SET
               status = EXCLUDED.status,
               provider_refund_id = EXCLUDED.provider_refund_id,
               failure_reason = EXCLUDED.failure_reason,
               processed_by = EXCLUDED.processed_by,
               refunded_at = EXCLUDED.refunded_at,
               failed_at = EXCLUDED.failed_at,
               updated_at = EXCLUDED.updated_at"#,
    )
    .bind(r.id.into_uuid())
    .bind(r.payment_id.into_uuid())
    .bind(r.amount.amount())
    .bind(r.amount.currency().code())
    .bind(r.status.as_str())
    .bind(r.reason.as_str())
    .bind(&r.notes)
    .bind(&r.provider_refund_id)
    .bind(&r.failure_reason)
    .bind(&r.requested_by)
    .bind(&r.processed_by)
    .bind(&r.metadata)
    .bind(r.refunded_at)
    .bind(r.failed_at)
    .bind(r.created_at)
    .bind(r.updated_at)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_outbox_row(conn: &mut PgConnection, e: &NewOutboxEvent) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO outbox_events (event_id, topic, partition_key, payload, created_at)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(e.event_id)
    .bind(&e.topic)
    .bind(&e.partition_key)
    .bind(&e.payload)
    .bind(e.created_at)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn enqueue_events(conn: &mut PgConnection, events: &[DomainEvent]) -> Result<(), RepoError> {
    let now = Utc::now();
    for event in events {
        insert_outbox_row(&mut *conn, &event.to_outbox(now)).await?;
    }
    Ok(())
}

async fn load_refunds(
    conn: &mut PgConnection,
    payment_id: PaymentId,
) -> Result<Vec<Refund>, RepoError> {
    let rows: Vec<DbRefund> = sqlx::query_as(concat!(
        "SELECT ",
        refund_columns!(),
        " FROM refunds WHERE payment_id = $1 ORDER BY created_at, id"
    ))
    .bind(payment_id.into_uuid())
    .fetch_all(conn)
    .await
    .map_err(db_err)?;

    rows.into_iter().map(DbRefund::into_domain).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PaymentRepository for PostgresRepo {
    async fn insert_payment(
        &self,
        payment: &Payment,
        events: Vec<DomainEvent>,
    ) -> Result<(), RepoError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        if let Err(e) = insert_payment_row(&mut db_tx, payment).await {
            if is_unique_violation(&e) {
                return Err(RepoError::Conflict(format!(
                    "payment already exists for order {}",
                    payment.order_id
                )));
            }
            return Err(db_err(e));
        }
        enqueue_events(&mut db_tx, &events).await?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE id = $1"
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE payment_intent_id = $1 OR provider_payment_id = $1 LIMIT 1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Payment>, i64), RepoError> {
        let total: DbCount =
            sqlx::query_as(r#"SELECT COUNT(*) AS count FROM payments WHERE user_id = $1"#)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        let rows: Vec<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE user_id = $1 ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let payments = rows
            .into_iter()
            .map(DbPayment::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((payments, total.count))
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Refund>, RepoError> {
        let row: Option<DbRefund> = sqlx::query_as(concat!(
            "SELECT ",
            refund_columns!(),
            " FROM refunds WHERE id = $1"
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbRefund::into_domain).transpose()
    }

    async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_refunds(&mut conn, payment_id).await
    }

    async fn mutate(
        &self,
        id: PaymentId,
        dedup_key: Option<&str>,
        mutation: PaymentMutation,
    ) -> Result<MutationOutcome, RepoError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        if let Some(key) = dedup_key {
            let inserted = sqlx::query(
                r#"INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2)
                   ON CONFLICT (event_id) DO NOTHING"#,
            )
            .bind(key)
            .bind(Utc::now())
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if inserted == 0 {
                tracing::debug!(event_id = key, payment_id = %id, "dedup key already recorded");
                return Ok(MutationOutcome::AlreadyProcessed);
            }
        }

        // Lock the payment row for the rest of the transaction
        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.into_uuid())
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let mut payment = row.ok_or(RepoError::NotFound)?.into_domain()?;
        let refunds = load_refunds(&mut db_tx, id).await?;
        let mut ledger = RefundLedger::new(id, refunds);

        // A rejected mutation drops the transaction, rolling back the dedup mark
        let events = mutation(&mut payment, &mut ledger)?;

        update_payment_row(&mut db_tx, &payment).await?;
        for refund in &ledger.refunds {
            upsert_refund_row(&mut db_tx, refund).await?;
        }
        enqueue_events(&mut db_tx, &events).await?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

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
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        if let Some(key) = dedup_key {
            let inserted = sqlx::query(
                r#"INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2)
                   ON CONFLICT (event_id) DO NOTHING"#,
            )
            .bind(key)
            .bind(Utc::now())
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if inserted == 0 {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"INSERT INTO reconciliation_conflicts
                   (id, event_id, event_type, payment_id, local_status, reason, payload, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(conflict.id)
        .bind(&conflict.event_id)
        .bind(&conflict.event_type)
        .bind(conflict.payment_id.map(PaymentId::into_uuid))
        .bind(conflict.local_status.map(|s| s.as_str()))
        .bind(&conflict.reason)
        .bind(&conflict.payload)
        .bind(conflict.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;
        Ok(true)
    }

    async fn list_conflicts(&self, limit: i64) -> Result<Vec<ReconciliationConflict>, RepoError> {
        let rows: Vec<DbConflict> = sqlx::query_as(concat!(
            "SELECT ",
            conflict_columns!(),
            " FROM reconciliation_conflicts ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbConflict::into_domain).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotency store
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl IdempotencyStore for PostgresRepo {
    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2)
               ON CONFLICT (event_id) DO NOTHING"#,
        )
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT event_id FROM processed_events WHERE event_id = $1"#)
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox store
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OutboxStore for PostgresRepo {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let rows: Vec<DbOutboxEvent> = sqlx::query_as(concat!(
            "SELECT ",
            outbox_columns!(),
            " FROM outbox_events WHERE published_at IS NULL ORDER BY id LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbOutboxEvent::into_domain).collect()
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(r#"UPDATE outbox_events SET published_at = $1 WHERE id = ANY($2)"#)
            .bind(Utc::now())
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_publish_failure(&self, ids: &[i64], error: &str) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"UPDATE outbox_events SET attempts = attempts + 1, last_error = $1 WHERE id = ANY($2)"#,
        )
        .bind(error)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
