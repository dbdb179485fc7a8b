//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP endpoints of careerhub:
//! - Auth and account endpoints
//! - Document endpoints and the presigned object storage
//! - Mentor directory and booking endpoints
//! - Community posts, comments and likes
//! - Notifications and push preferences
//! - Admin endpoints
//! - Health check

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod common;
pub mod documents;
pub mod health;
pub mod mentors;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod responses;
pub mod storage;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/documents", documents::router())
        .nest("/mentors", mentors::protected_router())
        .nest("/bookings", bookings::router())
        .nest("/posts", posts::protected_router())
        .nest("/notifications", notifications::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes that personalise their answer for signed-in callers
    let viewer_routes = Router::new()
        .nest("/posts", posts::public_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::optional_auth,
        ));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/mentors", mentors::public_router())
        .merge(viewer_routes)
        .merge(admin_routes)
        .merge(protected_routes)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(origin = %cors_origin, "Invalid CORS origin, cross-origin requests disabled");
            CorsLayer::new()
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .nest("/storage", storage::router(state.max_upload_bytes))
        .merge(health::router())
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
