//! Outbox relay.
//!
//! Drains committed outbox rows onto the message bus in sequence order.
//! Rows are only marked published after the broker acknowledged them, so
//! delivery is at-least-once; consumers deduplicate on the message id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use payments_types::domain::OutboxEvent;
use payments_types::ports::{BusMessage, MessageBus};
use payments_types::{OutboxStore, RepoError};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What one relay round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
    /// Rows held back because an earlier row for the same key failed.
    pub deferred: usize,
}

impl RelayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }
}

pub struct OutboxRelay<O: OutboxStore> {
    store: O,
    bus: Arc<dyn MessageBus>,
    config: RelayConfig,
}

impl<O: OutboxStore> OutboxRelay<O> {
    pub fn new(store: O, bus: Arc<dyn MessageBus>, config: RelayConfig) -> Self {
        Self { store, bus, config }
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            "starting outbox relay"
        );
        let mut failures: u32 = 0;

        loop {
            match self.run_once().await {
                Ok(report) => {
                    if report.published > 0 {
                        tracing::debug!(published = report.published, "published outbox events");
                    }
                    if report.is_clean() {
                        failures = 0;
                    } else {
                        failures = failures.saturating_add(1);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "outbox relay round failed");
                    failures = failures.saturating_add(1);
                }
            }

            let delay = self.delay(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("outbox relay stopped");
    }

    /// Publishes one batch of unpublished rows.
    ///
    /// Rows are sent as runs of consecutive same-topic rows so the global
    /// sequence order is kept. Once a row fails, later rows sharing its key
    /// are held back until the next round.
    pub async fn run_once(&self) -> Result<RelayReport, RepoError> {
        let rows = self.store.fetch_unpublished(self.config.batch_size).await?;
        let mut report = RelayReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for run in topic_runs(&rows) {
            let (ready, held): (Vec<&OutboxEvent>, Vec<&OutboxEvent>) = run
                .iter()
                .partition(|row| !blocked.contains(&row.partition_key));
            report.deferred += held.len();
            if ready.is_empty() {
                continue;
            }

            let topic = ready[0].topic.clone();
            let messages: Vec<BusMessage> = ready.iter().map(|row| to_message(row)).collect();

            let (acked, failure) = match self.bus.publish_batch(&topic, messages).await {
                Ok(()) => (ready.len(), None),
                Err(e) => (e.acked().min(ready.len()), Some(e.to_string())),
            };

            let published: Vec<i64> = ready[..acked].iter().map(|row| row.id).collect();
            if !published.is_empty() {
                self.store.mark_published(&published).await?;
                report.published += published.len();
            }

            if let Some(reason) = failure {
                let failed = &ready[acked..];
                tracing::warn!(
                    topic = %topic,
                    failed = failed.len(),
                    error = %reason,
                    "outbox publish failed"
                );
                let ids: Vec<i64> = failed.iter().map(|row| row.id).collect();
                self.store.record_publish_failure(&ids, &reason).await?;
                blocked.extend(failed.iter().map(|row| row.partition_key.clone()));
                report.failed += failed.len();
            }
        }

        Ok(report)
    }

    /// Poll interval after a clean round, otherwise exponential with jitter.
    fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.config.poll_interval;
        }
        let base = self
            .config
            .poll_interval
            .saturating_mul(2u32.saturating_pow(failures.min(16)))
            .min(self.config.max_backoff);
        let jitter_ms = base.as_millis() as u64 / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (base + jitter).min(self.config.max_backoff)
    }
}

/// Splits rows into maximal runs of consecutive rows sharing a topic.
fn topic_runs(rows: &[OutboxEvent]) -> Vec<&[OutboxEvent]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].topic != rows[start].topic {
            if start < i {
                runs.push(&rows[start..i]);
            }
            start = i;
        }
    }
    runs
}

fn to_message(row: &OutboxEvent) -> BusMessage {
    BusMessage {
        id: row.event_id.to_string(),
        topic: row.topic.clone(),
        key: row.partition_key.clone(),
        payload: row.payload.to_string().into_bytes(),
    }
}
