//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use payments_types::{
    AppError, ConfirmPaymentRequest, CreatePaymentRequest, CreateRefundRequest, IdempotencyStore,
    PageQuery, PaymentId, PaymentRepository, PaymentResponse, RefundId, RefundResponse,
    WebhookAckResponse,
};

use super::signature::{SIGNATURE_HEADER, SignatureVerifier};
use super::stripe_event;
use crate::PaymentService;

/// Application state shared across handlers.
pub struct AppState<R: PaymentRepository + IdempotencyStore> {
    pub service: PaymentService<R>,
    /// `None` disables webhook signature checks.
    pub webhook_verifier: Option<SignatureVerifier>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejected(_) => StatusCode::CONFLICT,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let message = match &self.0 {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Provider(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Rejected(e) => e.to_string(),
        };
        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16(),
            "kind": self.0.kind()
        });

        (status, Json(body)).into_response()
    }
}

fn parse_payment_id(raw: &str) -> Result<PaymentId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest("Invalid payment ID".into()))
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn create_payment<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state.service.create_payment(req).await?;
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(&payment))))
}

/// Get payment by ID.
#[tracing::instrument(skip(state), fields(payment_id = %id))]
pub async fn get_payment<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state.service.get_payment(parse_payment_id(&id)?).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

#[tracing::instrument(skip(state))]
pub async fn get_payment_by_order<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state.service.get_payment_by_order(&order_id).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// List a user's payments, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_user_payments<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.service.list_user_payments(&user_id, query).await?;
    Ok(Json(page))
}

#[tracing::instrument(skip(state, req), fields(payment_id = %id))]
pub async fn confirm_payment<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .service
        .confirm_payment(parse_payment_id(&id)?, req)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

#[tracing::instrument(skip(state), fields(payment_id = %id))]
pub async fn cancel_payment<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state.service.cancel_payment(parse_payment_id(&id)?).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Refunds
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(payment_id = %id, amount = req.amount))]
pub async fn create_refund<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<CreateRefundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let refund = state
        .service
        .request_refund(parse_payment_id(&id)?, req)
        .await?;
    Ok((StatusCode::CREATED, Json(RefundResponse::from(&refund))))
}

#[tracing::instrument(skip(state), fields(payment_id = %id))]
pub async fn list_refunds<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let refunds = state.service.list_refunds(parse_payment_id(&id)?).await?;
    let response: Vec<RefundResponse> = refunds.iter().map(RefundResponse::from).collect();
    Ok(Json(response))
}

#[tracing::instrument(skip(state), fields(refund_id = %id))]
pub async fn get_refund<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let refund_id: RefundId = id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid refund ID".into()))?;
    let refund = state.service.get_refund(refund_id).await?;
    Ok(Json(RefundResponse::from(&refund)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    pub limit: Option<i64>,
}

#[tracing::instrument(skip(state))]
pub async fn list_conflicts<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<ConflictQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let conflicts = state
        .service
        .list_conflicts(query.limit.unwrap_or(50))
        .await?;
    Ok(Json(conflicts))
}

/// Provider webhook intake.
///
/// Acknowledged with 200 whatever the reconciliation outcome; only
/// infrastructure failures answer 500 so the provider retries.
#[tracing::instrument(skip_all)]
pub async fn provider_webhook<R: PaymentRepository + IdempotencyStore>(
    State(state): State<Arc<AppState<R>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(verifier) = &state.webhook_verifier {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        verifier
            .verify(header, &body, chrono::Utc::now().timestamp())
            .map_err(|e| {
                tracing::warn!(error = %e, "rejected webhook signature");
                AppError::BadRequest(format!("Invalid webhook signature: {}", e))
            })?;
    }

    let notification =
        stripe_event::parse(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let outcome = state.service.handle_notification(notification).await?;

    Ok(Json(WebhookAckResponse {
        received: true,
        outcome,
    }))
}
