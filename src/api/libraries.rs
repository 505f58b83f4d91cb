//! Library endpoints
//!
//! Public reads go through optional auth so owners can see their own
//! pending or rejected libraries. Approval lives under `/admin`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, OptionalUser};
use crate::models::{
    AddLibraryItemInput, CreateLibraryInput, Library, LibraryDetail, LibraryItem, PagedResult,
    UpdateLibraryInput,
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_public))
        .route("/{id}", get(get_library))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_library))
        .route("/mine", get(list_mine))
        .route("/{id}", axum::routing::put(update_library).delete(delete_library))
        .route("/{id}/items", post(add_item))
        .route("/{id}/items/{item_id}", delete(remove_item))
        .route("/{id}/resubmit", post(resubmit))
        .route("/{id}/follow", post(follow).delete(unfollow))
}

/// Admin moderation routes, nested under `/admin/libraries`
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(list_pending))
        .route("/{id}/approve", post(approve))
        .route("/{id}/reject", post(reject))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

async fn list_public(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Library>>, ApiError> {
    Ok(Json(state.library_service.list_public(&query.params()).await?))
}

async fn get_library(
    State(state): State<AppState>,
    viewer: OptionalUser,
    Path(id): Path<i64>,
) -> Result<Json<LibraryDetail>, ApiError> {
    Ok(Json(state.library_service.get(viewer.user(), id).await?))
}

async fn create_library(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateLibraryInput>,
) -> Result<(StatusCode, Json<Library>), ApiError> {
    let library = state.library_service.create(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(library)))
}

async fn list_mine(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Library>>, ApiError> {
    Ok(Json(state.library_service.list_mine(&user.0, &query.params()).await?))
}

async fn update_library(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateLibraryInput>,
) -> Result<Json<Library>, ApiError> {
    Ok(Json(state.library_service.update(&user.0, id, body).await?))
}

async fn delete_library(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.library_service.delete(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<AddLibraryItemInput>,
) -> Result<(StatusCode, Json<LibraryItem>), ApiError> {
    let item = state.library_service.add_item(&user.0, id, body).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn remove_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state.library_service.remove_item(&user.0, id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resubmit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Library>, ApiError> {
    Ok(Json(state.library_service.resubmit(&user.0, id).await?))
}

async fn follow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.library_service.follow(&user.0, id).await?;
    Ok(StatusCode::CREATED)
}

async fn unfollow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.library_service.unfollow(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Library>>, ApiError> {
    Ok(Json(state.library_service.list_pending(&query.params()).await?))
}

async fn approve(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Library>, ApiError> {
    Ok(Json(state.library_service.approve(&admin.0, id).await?))
}

async fn reject(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<Library>, ApiError> {
    Ok(Json(state.library_service.reject(&admin.0, id, &body.reason).await?))
}
