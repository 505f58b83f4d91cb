//! Social graph endpoints
//!
//! Follow, block and mute are `POST` to create and `DELETE` to remove.
//! The read side (followers, following, counts) is public; the
//! relationship view needs a session.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{FollowCounts, PagedResult, Relationship, UserSummary};

/// Routes that act on behalf of the caller
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/follow/{username}", post(follow).delete(unfollow))
        .route("/block/{username}", post(block).delete(unblock))
        .route("/mute/{username}", post(mute).delete(unmute))
        .route("/users/{username}/relationship", get(relationship))
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/users/{username}/followers", get(followers))
        .route("/users/{username}/following", get(following))
        .route("/users/{username}/counts", get(counts))
}

async fn follow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.follow(user.0.id, &username).await?;
    Ok(StatusCode::CREATED)
}

async fn unfollow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.unfollow(user.0.id, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn block(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.block(user.0.id, &username).await?;
    Ok(StatusCode::CREATED)
}

async fn unblock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.unblock(user.0.id, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mute(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.mute(user.0.id, &username).await?;
    Ok(StatusCode::CREATED)
}

async fn unmute(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.social_service.unmute(user.0.id, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<UserSummary>>, ApiError> {
    let page = state.social_service.followers(&username, &query.params()).await?;
    Ok(Json(page))
}

async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<UserSummary>>, ApiError> {
    let page = state.social_service.following(&username, &query.params()).await?;
    Ok(Json(page))
}

async fn relationship(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(username): Path<String>,
) -> Result<Json<Relationship>, ApiError> {
    let relationship = state.social_service.relationship(user.0.id, &username).await?;
    Ok(Json(relationship))
}

async fn counts(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<FollowCounts>, ApiError> {
    Ok(Json(state.social_service.counts(&username).await?))
}
