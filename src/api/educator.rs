//! Educator earnings and payout requests
//!
//! Mounted behind `require_educator`; admins pass as well and see their own
//! figures.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CourseEarnings, EarningsSummary, PagedResult, PaymentSplit, Payout};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/earnings", get(earnings))
        .route("/earnings/courses", get(earnings_by_course))
        .route("/earnings/splits", get(recent_splits))
        .route("/payouts", get(list_payouts).post(request_payout))
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: i64,
}

async fn earnings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<EarningsSummary>, ApiError> {
    Ok(Json(state.payout_service.earnings_summary(user.0.id).await?))
}

async fn earnings_by_course(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<CourseEarnings>>, ApiError> {
    Ok(Json(state.payout_service.earnings_by_course(user.0.id).await?))
}

async fn recent_splits(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<PaymentSplit>>, ApiError> {
    Ok(Json(state.payout_service.recent_splits(user.0.id, &query.params()).await?))
}

async fn list_payouts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Payout>>, ApiError> {
    Ok(Json(state.payout_service.list_payouts(Some(user.0.id), &query.params()).await?))
}

async fn request_payout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<Payout>), ApiError> {
    let payout = state.payout_service.request_payout(&user.0, body.amount).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}
