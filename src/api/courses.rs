//! Course endpoints, including paid checkout

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, OptionalUser};
use crate::models::{Course, CreateCourseInput, Enrollment, PagedResult, TransactionDetail};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses))
        .route("/{id}", get(get_course))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_course))
        .route("/{id}/publish", post(publish_course))
        .route("/{id}/enroll", post(enroll))
        .route("/{id}/checkout", post(checkout))
}

/// `GET /courses` query; `educator_id` narrows to one educator's courses
#[derive(Debug, Deserialize)]
pub struct CourseListQuery {
    pub educator_id: Option<i64>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

async fn list_courses(
    State(state): State<AppState>,
    viewer: OptionalUser,
    Query(query): Query<CourseListQuery>,
) -> Result<Json<PagedResult<Course>>, ApiError> {
    let params = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    }
    .params();

    let page = match query.educator_id {
        Some(educator_id) => {
            state
                .course_service
                .list_by_educator(viewer.user(), educator_id, &params)
                .await?
        }
        None => state.course_service.list_published(&params).await?,
    };
    Ok(Json(page))
}

async fn get_course(
    State(state): State<AppState>,
    viewer: OptionalUser,
    Path(id): Path<i64>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(state.course_service.get(viewer.user(), id).await?))
}

async fn create_course(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateCourseInput>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    let course = state.course_service.create(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn publish_course(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(state.course_service.publish(&user.0, id).await?))
}

async fn enroll(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Enrollment>), ApiError> {
    let enrollment = state.course_service.enroll_free(&user.0, id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// 201 for a new checkout, 200 when an open one is handed back
async fn checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<TransactionDetail>), ApiError> {
    let checkout = state.payment_service.checkout(&user.0, id).await?;
    let status = if checkout.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(checkout.detail)))
}
