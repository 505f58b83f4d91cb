//! AlexPoints endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{LeaderboardEntry, PagedResult, PointsBalance, PointsTransaction};

/// Balance and history need a session
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", get(balance))
        .route("/history", get(history))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/leaderboard", get(leaderboard))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

async fn balance(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<PointsBalance>, ApiError> {
    Ok(Json(state.points_service.balance(user.0.id).await?))
}

async fn history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<PointsTransaction>>, ApiError> {
    Ok(Json(state.points_service.history(user.0.id, &query.params()).await?))
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    Ok(Json(state.points_service.leaderboard(query.limit).await?))
}
