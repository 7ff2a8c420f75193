//! # Payments Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the repository adapter
//! - Pick the cache, bus and provider adapters
//! - Start the outbox relay and the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payments_hex::inbound::{HttpServer, SignatureVerifier, shutdown_signal};
use payments_hex::outbound::{
    InMemoryBus, InMemoryCache, NatsBus, RedisCache, SimulatedProvider, StripeProvider,
};
use payments_hex::{OutboxRelay, PaymentCache, PaymentService, RelayConfig, ServiceConfig};
use payments_repo::build_repo;
use payments_types::PaymentProvider;
use payments_types::ports::{CacheStore, MessageBus};

const STREAM_NAME: &str = "PAYMENTS";

fn init_tracer() -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Endpoint comes from OTEL_EXPORTER_OTLP_ENDPOINT
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("payments-service"), provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    let (telemetry, otel_provider) = if config.otlp_enabled {
        let (tracer, provider) = init_tracer()?;
        (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(provider),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,payments_app=debug,payments_hex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    tracing::info!("Starting payments server on port {}", config.port);

    // Build repository (handles connection and migration)
    let repo = build_repo(&config.database_url).await?;

    let cache_store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis cache");
            Arc::new(RedisCache::connect(url).await?)
        }
        None => {
            tracing::info!("REDIS_URL not set, caching in process");
            Arc::new(InMemoryCache::new())
        }
    };

    let bus: Arc<dyn MessageBus> = match &config.nats_url {
        Some(url) => {
            let bus = NatsBus::connect(url).await?;
            bus.ensure_stream(STREAM_NAME, vec!["payment.>".into(), "refund.>".into()])
                .await?;
            tracing::info!(stream = STREAM_NAME, "Publishing events to NATS JetStream");
            Arc::new(bus)
        }
        None => {
            tracing::warn!("NATS_URL not set, events are kept in process and not delivered");
            Arc::new(InMemoryBus::new())
        }
    };

    let provider: Arc<dyn PaymentProvider> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeProvider::new(
            key.clone(),
            config.stripe_api_base.clone(),
        )),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, using the simulated provider");
            Arc::new(SimulatedProvider::default())
        }
    };

    let service = PaymentService::new(
        repo.clone(),
        provider,
        PaymentCache::new(cache_store, config.cache_ttl),
    )
    .with_config(ServiceConfig {
        refund_window: chrono::Duration::days(config.refund_window_days),
        request_timeout: config.request_timeout,
    });

    // Outbox relay runs until the server has drained
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(
        repo,
        bus,
        RelayConfig {
            poll_interval: config.outbox_poll_interval,
            batch_size: config.outbox_batch_size,
            max_backoff: config.outbox_max_backoff,
        },
    );
    let relay_handle = tokio::spawn(relay.run(shutdown_rx));

    let server = match &config.webhook_secret {
        Some(secret) => HttpServer::with_webhook_verifier(
            service,
            SignatureVerifier::new(secret.clone(), config.webhook_tolerance_secs),
        ),
        None => {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook signatures are not checked");
            HttpServer::new(service)
        }
    };
    let addr = format!("0.0.0.0:{}", config.port);

    let result = server.run(&addr, shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = relay_handle.await {
        tracing::error!(error = %e, "outbox relay task failed");
    }

    // Ensure traces are flushed before exit
    if let Some(provider) = otel_provider {
        let _ = provider.shutdown();
    }
    result
}
