//! HTTP Server configuration and startup.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use payments_types::{IdempotencyStore, PaymentRepository};

use super::handlers::{self, AppState};
use super::signature::SignatureVerifier;
use crate::PaymentService;

/// HTTP Server for the Payments API.
pub struct HttpServer<R: PaymentRepository + IdempotencyStore> {
    state: Arc<AppState<R>>,
}

impl<R: PaymentRepository + IdempotencyStore> HttpServer<R> {
    /// Creates a new HTTP server with the given service.
    pub fn new(service: PaymentService<R>) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                webhook_verifier: None,
            }),
        }
    }

    /// Creates a server that checks webhook signatures.
    pub fn with_webhook_verifier(service: PaymentService<R>, verifier: SignatureVerifier) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                webhook_verifier: Some(verifier),
            }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/payments", post(handlers::create_payment::<R>))
            .route("/api/payments/{id}", get(handlers::get_payment::<R>))
            .route(
                "/api/payments/order/{order_id}",
                get(handlers::get_payment_by_order::<R>),
            )
            .route(
                "/api/payments/{id}/confirm",
                post(handlers::confirm_payment::<R>),
            )
            .route(
                "/api/payments/{id}/cancel",
                post(handlers::cancel_payment::<R>),
            )
            .route(
                "/api/payments/{id}/refunds",
                post(handlers::create_refund::<R>).get(handlers::list_refunds::<R>),
            )
            .route("/api/refunds/{id}", get(handlers::get_refund::<R>))
            .route(
                "/api/users/{user_id}/payments",
                get(handlers::list_user_payments::<R>),
            )
            .route(
                "/api/reconciliation/conflicts",
                get(handlers::list_conflicts::<R>),
            )
            .route(
                "/api/webhooks/provider",
                post(handlers::provider_webhook::<R>),
            )
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address until `shutdown` resolves.
    pub async fn run(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
