//! SQLite repository adapter.
//!
//! SQLite has no row-level locks, so the pool holds a single connection and
//! every write transaction is serialized behind it.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;

use payments_types::domain::{NewOutboxEvent, OutboxEvent};
use payments_types::ports::{MutationOutcome, PaymentMutation};
use payments_types::{
    DomainEvent, IdempotencyStore, OutboxStore, Payment, PaymentId, PaymentRepository,
    ReconciliationConflict, Refund, RefundId, RefundLedger, RepoError,
};

use crate::types::{
    DbConflict, DbCount, DbOutboxEvent, DbPayment, DbRefund, conflict_columns, format_ts,
    outbox_columns, payment_columns, refund_columns,
};

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
#[derive(Clone)]
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection: in-memory databases live and die with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(include_str!("../migrations/0001_create_payments.sql"))
            .execute(&pool)
            .await?;
        sqlx::raw_sql(include_str!("../migrations/0002_create_event_tables.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn opt_ts(ts: Option<chrono::DateTime<Utc>>) -> Option<String> {
    ts.map(format_ts)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row writers
// ─────────────────────────────────────────────────────────────────────────────

async fn insert_payment_row(conn: &mut SqliteConnection, p: &Payment) -> Result<(), sqlx::Error> {
    let card = p.card.as_ref();
    sqlx::query(
        r#"INSERT INTO payments (id, order_id, user_id, amount, refunded_amount, currency,
               payment_method, provider, status, payment_intent_id, provider_payment_id,
               provider_customer_id, card_last4, card_brand, card_exp_month, card_exp_year,
               description, receipt_email, receipt_url, metadata, failure_code, failure_message,
               paid_at, failed_at, cancelled_at, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(p.id.to_string())
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
    .bind(p.metadata.to_string())
    .bind(&p.failure_code)
    .bind(&p.failure_message)
    .bind(opt_ts(p.paid_at))
    .bind(opt_ts(p.failed_at))
    .bind(opt_ts(p.cancelled_at))
    .bind(format_ts(p.created_at))
    .bind(format_ts(p.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_payment_row(conn: &mut SqliteConnection, p: &Payment) -> Result<(), RepoError> {
    let card = p.card.as_ref();
    sqlx::query(
        r#"UPDATE payments SET refunded_amount = ?, status = ?, payment_intent_id = ?,
               provider_payment_id = ?, provider_customer_id = ?, card_last4 = ?,
               card_brand = ?, card_exp_month = ?, card_exp_year = ?, receipt_url = ?,
               failure_code = ?, failure_message = ?, paid_at = ?, failed_at = ?,
               cancelled_at = ?, updated_at = ?
           WHERE id = ?"#,
    )
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
    .bind(opt_ts(p.paid_at))
    .bind(opt_ts(p.failed_at))
    .bind(opt_ts(p.cancelled_at))
    .bind(format_ts(p.updated_at))
    .bind(p.id.to_string())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn upsert_refund_row(conn: &mut SqliteConnection, r: &Refund) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO refunds (id, payment_id, amount, currency, status, reason, notes,
               provider_refund_id, failure_reason, requested_by, processed_by, metadata,
               refunded_at, failed_at, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT (id) DO UPDATE SET
               status = excluded.status,
               provider_refund_id = excluded.provider_refund_id,
               failure_reason = excluded.failure_reason,
               processed_by = excluded.processed_by,
               refunded_at = excluded.refunded_at,
               failed_at = excluded.failed_at,
               updated_at = excluded.updated_at"#,
    )
    .bind(r.id.to_string())
    .bind(r.payment_id.to_string())
    .bind(r.amount.amount())
    .bind(r.amount.currency().code())
    .bind(r.status.as_str())
    .bind(r.reason.as_str())
    .bind(&r.notes)
    .bind(&r.provider_refund_id)
    .bind(&r.failure_reason)
    .bind(&r.requested_by)
    .bind(&r.processed_by)
    .bind(r.metadata.to_string())
    .bind(opt_ts(r.refunded_at))
    .bind(opt_ts(r.failed_at))
    .bind(format_ts(r.created_at))
    .bind(format_ts(r.updated_at))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_outbox_row(
    conn: &mut SqliteConnection,
    e: &NewOutboxEvent,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO outbox_events (event_id, topic, partition_key, payload, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(e.event_id.to_string())
    .bind(&e.topic)
    .bind(&e.partition_key)
    .bind(e.payload.to_string())
    .bind(format_ts(e.created_at))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn enqueue_events(
    conn: &mut SqliteConnection,
    events: &[DomainEvent],
) -> Result<(), RepoError> {
    let now = Utc::now();
    for event in events {
        insert_outbox_row(&mut *conn, &event.to_outbox(now)).await?;
    }
    Ok(())
}

async fn load_refunds(
    conn: &mut SqliteConnection,
    payment_id: PaymentId,
) -> Result<Vec<Refund>, RepoError> {
    let rows: Vec<DbRefund> = sqlx::query_as(concat!(
        "SELECT ",
        refund_columns!(),
        " FROM refunds WHERE payment_id = ? ORDER BY created_at, rowid"
    ))
    .bind(payment_id.to_string())
    .fetch_all(conn)
    .await
    .map_err(db_err)?;

    rows.into_iter().map(DbRefund::into_domain).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PaymentRepository for SqliteRepo {
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
            " FROM payments WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE order_id = ?"
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
            " FROM payments WHERE payment_intent_id = ? OR provider_payment_id = ? LIMIT 1"
        ))
        .bind(reference)
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
            sqlx::query_as(r#"SELECT COUNT(*) AS count FROM payments WHERE user_id = ?"#)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        let rows: Vec<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
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
            " FROM refunds WHERE id = ?"
        ))
        .bind(id.to_string())
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
                r#"INSERT INTO processed_events (event_id, processed_at) VALUES (?, ?)
                   ON CONFLICT (event_id) DO NOTHING"#,
            )
            .bind(key)
            .bind(format_ts(Utc::now()))
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if inserted == 0 {
                tracing::debug!(event_id = key, payment_id = %id, "dedup key already recorded");
                return Ok(MutationOutcome::AlreadyProcessed);
            }
        }

        let row: Option<DbPayment> = sqlx::query_as(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let mut payment = row.ok_or(RepoError::NotFound)?.into_domain()?;
        let refunds = load_refunds(&mut db_tx, id).await?;
        let mut ledger = RefundLedger::new(id, refunds);

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
                r#"INSERT INTO processed_events (event_id, processed_at) VALUES (?, ?)
                   ON CONFLICT (event_id) DO NOTHING"#,
            )
            .bind(key)
            .bind(format_ts(Utc::now()))
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
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conflict.id.to_string())
        .bind(&conflict.event_id)
        .bind(&conflict.event_type)
        .bind(conflict.payment_id.map(|id| id.to_string()))
        .bind(conflict.local_status.map(|s| s.as_str()))
        .bind(&conflict.reason)
        .bind(conflict.payload.to_string())
        .bind(format_ts(conflict.created_at))
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
            " FROM reconciliation_conflicts ORDER BY created_at DESC, rowid DESC LIMIT ?"
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
impl IdempotencyStore for SqliteRepo {
    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO processed_events (event_id, processed_at) VALUES (?, ?)
               ON CONFLICT (event_id) DO NOTHING"#,
        )
        .bind(event_id)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool, RepoError> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT event_id FROM processed_events WHERE event_id = ?"#)
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
impl OutboxStore for SqliteRepo {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let rows: Vec<DbOutboxEvent> = sqlx::query_as(concat!(
            "SELECT ",
            outbox_columns!(),
            " FROM outbox_events WHERE published_at IS NULL ORDER BY id LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbOutboxEvent::into_domain).collect()
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError> {
        let now = format_ts(Utc::now());
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;
        for id in ids {
            sqlx::query(r#"UPDATE outbox_events SET published_at = ? WHERE id = ?"#)
                .bind(&now)
                .bind(id)
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
        }
        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))
    }

    async fn record_publish_failure(&self, ids: &[i64], error: &str) -> Result<(), RepoError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;
        for id in ids {
            sqlx::query(
                r#"UPDATE outbox_events SET attempts = attempts + 1, last_error = ? WHERE id = ?"#,
            )
            .bind(error)
            .bind(id)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;
        }
        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))
    }
}
