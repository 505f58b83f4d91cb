//! API layer - HTTP handlers and routing
//!
//! Everything is served under `/api/v1`:
//! - Auth and profile endpoints
//! - Social graph (follow / block / mute)
//! - Libraries and their approval workflow
//! - AlexPoints
//! - Courses, checkout and the payment ledger
//! - Educator earnings and payouts
//! - Admin analytics and moderation

pub mod admin;
pub mod auth;
pub mod common;
pub mod courses;
pub mod educator;
pub mod health;
pub mod libraries;
pub mod middleware;
pub mod payments;
pub mod points;
pub mod social;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedUser, OptionalUser};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Educator routes (educator or admin role)
    let educator_routes = Router::new()
        .nest("/educator", educator::router())
        .route_layer(axum_middleware::from_fn(middleware::require_educator))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth, any role)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/libraries", libraries::protected_router())
        .nest("/points", points::protected_router())
        .nest("/courses", courses::protected_router())
        .merge(social::protected_router())
        .merge(payments::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes that still want to know who is asking
    let viewer_routes = Router::new()
        .nest("/libraries", libraries::public_router())
        .nest("/courses", courses::public_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth::public_router())
        .nest("/points", points::public_router())
        .merge(social::public_router())
        .merge(payments::public_router())
        .merge(viewer_routes)
        .merge(admin_routes)
        .merge(educator_routes)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` allows any origin without credentials; a concrete origin also
/// allows the session cookie.
fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE]);

    if cors_origin.trim() == "*" {
        return cors.allow_origin(AllowOrigin::any());
    }

    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin).allow_credentials(true),
        Err(e) => {
            tracing::warn!("invalid cors_origin {:?} ({}), cross-origin requests disabled", cors_origin, e);
            cors
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app(cors_origin: &str) -> Router {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        build_router(AppState::new(pool, Config::default()), cors_origin)
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app("*")
            .await
            .oneshot(Request::get("/api/v1/nothing-here").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_require_session() {
        let response = app("http://localhost:3000")
            .await
            .oneshot(
                Request::get("/api/v1/admin/analytics/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cors_preflight_echoes_origin() {
        let response = app("http://localhost:3000")
            .await
            .oneshot(
                Request::options("/api/v1/courses")
                    .header("origin", "http://localhost:3000")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }
}
