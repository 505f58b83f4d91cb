//! Payment ledger endpoints
//!
//! - GET /api/v1/payments/{reference} - Transaction with splits
//! - POST /api/v1/payments/{reference}/cancel - Buyer abandons a checkout
//! - POST /api/v1/payment-splits/preview - Split an amount with the current fee
//! - POST /api/v1/webhooks/payments - Gateway callback, HMAC-authenticated
//! - /api/v1/admin/payments/* - Listing, manual verify and refund

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{PagedResult, PaymentStatus, PaymentTransaction, SplitAmounts, TransactionDetail};
use crate::services::payment::{LedgerOutcome, WebhookAck, SIGNATURE_HEADER};

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/payments/{reference}", get(get_transaction))
        .route("/payments/{reference}/cancel", post(cancel))
}

/// Routes without a session: the preview and the gateway webhook
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/payment-splits/preview", post(preview_split))
        .route("/webhooks/payments", post(webhook))
}

/// Nested under `/admin/payments`
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_transactions))
        .route("/{reference}/verify", post(verify))
        .route("/{reference}/refund", post(refund))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    #[serde(flatten)]
    pub split: SplitAmounts,
    pub platform_fee_percent: f64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    pub status: Option<PaymentStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Body for a manual verification. Without `amount` the stored amount is
/// taken as confirmed.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    pub amount: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    pub reason: Option<String>,
}

async fn get_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reference): Path<String>,
) -> Result<Json<TransactionDetail>, ApiError> {
    Ok(Json(state.payment_service.get_transaction(&user.0, &reference).await?))
}

async fn cancel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reference): Path<String>,
) -> Result<Json<LedgerOutcome>, ApiError> {
    Ok(Json(state.payment_service.cancel(&user.0, &reference).await?))
}

async fn preview_split(
    State(state): State<AppState>,
    Json(body): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let split = state.payment_service.preview_split(body.amount)?;
    Ok(Json(PreviewResponse {
        split,
        platform_fee_percent: state.config.payments.platform_fee_percent,
        currency: state.payment_service.currency().to_string(),
    }))
}

/// The signature covers the raw bytes, so the body is taken unparsed
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    Ok(Json(state.payment_service.handle_webhook(&body, signature).await?))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<PagedResult<PaymentTransaction>>, ApiError> {
    let params = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    }
    .params();
    Ok(Json(state.payment_service.list_transactions(query.status, &params).await?))
}

async fn verify(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    body: Option<Json<VerifyRequest>>,
) -> Result<Json<LedgerOutcome>, ApiError> {
    let amount = body.and_then(|Json(b)| b.amount);
    Ok(Json(state.payment_service.verify(&reference, amount).await?))
}

async fn refund(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<LedgerOutcome>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.payment_service.refund(&reference, reason).await?))
}
