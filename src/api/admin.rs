//! Admin API endpoints
//!
//! Everything here sits behind `require_auth` and `require_admin`:
//! - Analytics overview
//! - Library moderation (see [`crate::api::libraries::admin_router`])
//! - Ledger listing, manual verify and refund (see [`crate::api::payments::admin_router`])
//! - Payout approval

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::{libraries, payments};
use crate::models::{PagedResult, Payout};
use crate::services::AnalyticsOverview;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics/overview", get(analytics_overview))
        .route("/payouts", get(list_payouts))
        .route("/payouts/{id}/approve", post(approve_payout))
        .route("/payouts/{id}/reject", post(reject_payout))
        .nest("/libraries", libraries::admin_router())
        .nest("/payments", payments::admin_router())
}

#[derive(Debug, Deserialize)]
pub struct PayoutListQuery {
    pub educator_id: Option<i64>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayoutDecision {
    pub note: Option<String>,
}

async fn analytics_overview(
    State(state): State<AppState>,
) -> Result<Json<AnalyticsOverview>, ApiError> {
    Ok(Json(state.analytics_service.overview().await?))
}

async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<PayoutListQuery>,
) -> Result<Json<PagedResult<Payout>>, ApiError> {
    let params = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    }
    .params();
    Ok(Json(state.payout_service.list_payouts(query.educator_id, &params).await?))
}

async fn approve_payout(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<PayoutDecision>>,
) -> Result<Json<Payout>, ApiError> {
    let note = body.and_then(|Json(b)| b.note);
    Ok(Json(
        state
            .payout_service
            .approve_payout(&admin.0, id, note.as_deref())
            .await?,
    ))
}

async fn reject_payout(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<PayoutDecision>>,
) -> Result<Json<Payout>, ApiError> {
    let note = body.and_then(|Json(b)| b.note);
    Ok(Json(
        state
            .payout_service
            .reject_payout(&admin.0, id, note.as_deref())
            .await?,
    ))
}
