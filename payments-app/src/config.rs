//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// `None` keeps the cache in process.
    pub redis_url: Option<String>,
    /// `None` keeps published events in process.
    pub nats_url: Option<String>,
    /// `None` selects the simulated provider.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub cache_ttl: Duration,
    pub refund_window_days: i64,
    pub request_timeout: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub outbox_max_backoff: Duration,
    pub otlp_enabled: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        Ok(Self {
            port: parse_or("PORT", 3000)?,
            database_url,
            redis_url: optional("REDIS_URL"),
            nats_url: optional("NATS_URL"),
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            stripe_api_base: optional("STRIPE_API_BASE")
                .unwrap_or_else(|| payments_hex::outbound::stripe::DEFAULT_API_BASE.to_string()),
            webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            webhook_tolerance_secs: parse_or("WEBHOOK_TOLERANCE_SECS", 300)?,
            cache_ttl: Duration::from_secs(parse_or("PAYMENT_CACHE_TTL_SECS", 300)?),
            refund_window_days: parse_or("REFUND_WINDOW_DAYS", 30)?,
            request_timeout: Duration::from_millis(parse_or("REQUEST_TIMEOUT_MS", 10_000)?),
            outbox_poll_interval: Duration::from_millis(parse_or("OUTBOX_POLL_INTERVAL_MS", 1000)?),
            outbox_batch_size: parse_or("OUTBOX_BATCH_SIZE", 100)?,
            outbox_max_backoff: Duration::from_secs(parse_or("OUTBOX_MAX_BACKOFF_SECS", 30)?),
            otlp_enabled: optional("OTEL_EXPORTER_OTLP_ENDPOINT").is_some(),
        })
    }
}

/// Unset and blank variables are both treated as absent.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        None => Ok(default),
    }
}
