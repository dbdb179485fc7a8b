//! Notification API endpoints
//!
//! - GET /api/v1/notifications?unread_only=&page=&per_page=
//! - GET /api/v1/notifications/unread-count
//! - POST /api/v1/notifications/{id}/read
//! - POST /api/v1/notifications/read-all
//! - GET/PUT /api/v1/notifications/preferences

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::CountResponse;
use crate::models::{ListParams, Notification, NotificationPreferences, PagedResult, UpdatePreferencesInput};
use crate::services::NotificationServiceError;

impl From<NotificationServiceError> for ApiError {
    fn from(err: NotificationServiceError) -> Self {
        match err {
            NotificationServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            NotificationServiceError::NotFound => ApiError::not_found(err.to_string()),
            NotificationServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Build notification routes (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/{id}/read", post(mark_read))
        .route("/preferences", get(get_preferences).put(update_preferences))
}

async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<PagedResult<Notification>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(
        state
            .notification_service
            .list(user.0.id, query.unread_only, params)
            .await?,
    ))
}

async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.notification_service.unread_count(user.0.id).await?;
    Ok(Json(CountResponse { count }))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.notification_service.mark_read(user.0.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.notification_service.mark_all_read(user.0.id).await?;
    Ok(Json(CountResponse {
        count: count as i64,
    }))
}

async fn get_preferences(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<NotificationPreferences>, ApiError> {
    Ok(Json(
        state.notification_service.get_preferences(user.0.id).await?,
    ))
}

async fn update_preferences(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdatePreferencesInput>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    Ok(Json(
        state
            .notification_service
            .update_preferences(user.0.id, body)
            .await?,
    ))
}
