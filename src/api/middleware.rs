//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope and the service error mappings
//! - Authentication (session token validation)
//! - Authorization (role checks)

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::create_cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCourseRepository, SqlxLibraryRepository, SqlxPaymentRepository, SqlxPayoutRepository,
    SqlxPointsRepository, SqlxRelationRepository, SqlxSessionRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    AnalyticsService, AnalyticsServiceError, CourseService, CourseServiceError, LibraryService,
    LibraryServiceError, PaymentService, PaymentServiceError, PayoutService, PayoutServiceError,
    PointsService, PointsServiceError, SocialService, SocialServiceError, UserService,
    UserServiceError,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub user_service: Arc<UserService>,
    pub social_service: Arc<SocialService>,
    pub library_service: Arc<LibraryService>,
    pub points_service: Arc<PointsService>,
    pub course_service: Arc<CourseService>,
    pub payment_service: Arc<PaymentService>,
    pub payout_service: Arc<PayoutService>,
    pub analytics_service: Arc<AnalyticsService>,
}

impl AppState {
    /// Wire repositories, the cache and services over one pool
    pub fn new(pool: DynDatabasePool, config: Config) -> Self {
        let cache = create_cache(&config.cache);

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let library_repo = SqlxLibraryRepository::boxed(pool.clone());
        let course_repo = SqlxCourseRepository::boxed(pool.clone());
        let payment_repo = SqlxPaymentRepository::boxed(pool.clone());

        let points_service = Arc::new(PointsService::new(
            SqlxPointsRepository::boxed(pool.clone()),
            user_repo.clone(),
            config.points.enabled,
        ));
        let user_service = Arc::new(UserService::with_session_days(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            points_service.clone(),
            config.auth.session_days,
        ));
        let social_service = Arc::new(SocialService::new(
            SqlxRelationRepository::boxed(pool.clone()),
            user_repo.clone(),
            points_service.clone(),
        ));
        let library_service = Arc::new(LibraryService::new(library_repo.clone(), points_service.clone()));
        let course_service = Arc::new(CourseService::new(course_repo.clone(), points_service.clone()));
        let payment_service = Arc::new(PaymentService::new(
            payment_repo.clone(),
            course_repo.clone(),
            points_service.clone(),
            cache.clone(),
            &config.payments,
        ));
        let payout_service = Arc::new(PayoutService::new(
            payment_repo.clone(),
            SqlxPayoutRepository::boxed(pool.clone()),
            &config.payments,
        ));
        let analytics_service = Arc::new(AnalyticsService::new(
            user_repo,
            library_repo,
            course_repo,
            payment_repo,
            cache,
            config.payments.currency.clone(),
        ));

        Self {
            pool,
            config: Arc::new(config),
            user_service,
            social_service,
            library_service,
            points_service,
            course_service,
            payment_service,
            payout_service,
            analytics_service,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Viewer on routes that work with or without a session
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<User>);

impl OptionalUser {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(
            parts.extensions.get::<AuthenticatedUser>().map(|au| au.0.clone()),
        ))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new("UNPROCESSABLE", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    /// Log the cause and hide it from the client
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("internal error: {}", err);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "UNPROCESSABLE" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<SocialServiceError> for ApiError {
    fn from(e: SocialServiceError) -> Self {
        match e {
            SocialServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            SocialServiceError::NotFound(msg) => ApiError::not_found(msg),
            SocialServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            SocialServiceError::Conflict(msg) => ApiError::conflict(msg),
            SocialServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<LibraryServiceError> for ApiError {
    fn from(e: LibraryServiceError) -> Self {
        match e {
            LibraryServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            LibraryServiceError::Unprocessable(msg) => ApiError::unprocessable(msg),
            LibraryServiceError::NotFound | LibraryServiceError::ItemNotFound => {
                ApiError::not_found(e.to_string())
            }
            LibraryServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            LibraryServiceError::Conflict(msg) => ApiError::conflict(msg),
            LibraryServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<PointsServiceError> for ApiError {
    fn from(e: PointsServiceError) -> Self {
        match e {
            PointsServiceError::UserNotFound => ApiError::not_found("User not found"),
            PointsServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<CourseServiceError> for ApiError {
    fn from(e: CourseServiceError) -> Self {
        match e {
            CourseServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CourseServiceError::Unprocessable(msg) => ApiError::unprocessable(msg),
            CourseServiceError::NotFound => ApiError::not_found("Course not found"),
            CourseServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            CourseServiceError::Conflict(msg) => ApiError::conflict(msg),
            CourseServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<PaymentServiceError> for ApiError {
    fn from(e: PaymentServiceError) -> Self {
        match e {
            PaymentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            PaymentServiceError::InvalidSplit(err) => ApiError::validation_error(err.to_string()),
            PaymentServiceError::FreeCourse => ApiError::unprocessable(e.to_string()),
            PaymentServiceError::AmountMismatch { expected, reported } => ApiError::with_details(
                "UNPROCESSABLE",
                e.to_string(),
                serde_json::json!({ "expected": expected, "reported": reported }),
            ),
            PaymentServiceError::InvalidTransition { status, event } => ApiError::with_details(
                "CONFLICT",
                e.to_string(),
                serde_json::json!({ "status": status, "event": event }),
            ),
            PaymentServiceError::InvalidSignature => ApiError::unauthorized(e.to_string()),
            PaymentServiceError::NotFound(msg) => ApiError::not_found(msg),
            PaymentServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            PaymentServiceError::Conflict(msg) => ApiError::conflict(msg),
            PaymentServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<PayoutServiceError> for ApiError {
    fn from(e: PayoutServiceError) -> Self {
        match e {
            PayoutServiceError::Unprocessable(msg) => ApiError::unprocessable(msg),
            PayoutServiceError::NotFound => ApiError::not_found("Payout not found"),
            PayoutServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            PayoutServiceError::Conflict(msg) => ApiError::conflict(msg),
            PayoutServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<AnalyticsServiceError> for ApiError {
    fn from(e: AnalyticsServiceError) -> Self {
        match e {
            AnalyticsServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

/// Extract session token from the `Authorization` header or the
/// `session` cookie
pub fn extract_session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Optional authentication middleware
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_session_token(request.headers()) {
        match state.user_service.validate_session(&token).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(AuthenticatedUser(user));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("optional session lookup failed: {}", e),
        }
    }
    next.run(request).await
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Educator authorization middleware; admins pass too
pub async fn require_educator(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_educator() {
        return Err(ApiError::forbidden("Educator privileges required"));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc-123"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=tok; x=1"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert!(extract_session_token(&headers).is_none());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::validation_error("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unprocessable("x").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::internal("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err: ApiError = UserServiceError::InternalError(anyhow::anyhow!("db password leaked")).into();
        assert_eq!(err.error.code, "INTERNAL_ERROR");
        assert!(!err.error.message.contains("password"));
    }

    #[test]
    fn test_amount_mismatch_carries_details() {
        let err: ApiError = PaymentServiceError::AmountMismatch {
            expected: 5_000,
            reported: 4_000,
        }
        .into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let details = err.error.details.unwrap();
        assert_eq!(details["expected"], 5_000);
        assert_eq!(details["reported"], 4_000);
    }
}
