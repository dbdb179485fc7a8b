//! Admin API endpoints
//!
//! Requires the admin role:
//! - GET /api/v1/admin/users - Paginated account list
//! - PUT /api/v1/admin/users/{id}/status - Ban or reinstate an account
//! - POST /api/v1/admin/maintenance - Run the maintenance sweep now

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::UserResponse;
use crate::models::{PagedResult, UserStatus};
use crate::services::MaintenanceReport;

/// Request for changing an account's status
#[derive(Debug, Deserialize)]
pub struct UserStatusRequest {
    pub status: UserStatus,
}

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}/status", put(update_user_status))
        .route("/maintenance", post(run_maintenance))
}

/// GET /api/v1/admin/users - List users
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<UserResponse>>, ApiError> {
    let params = query.params();
    let page = state.user_service.list_users(params).await?;
    let items = page.items.into_iter().map(UserResponse::from).collect();
    Ok(Json(PagedResult::new(items, page.total, &params)))
}

/// PUT /api/v1/admin/users/{id}/status - Ban or reinstate
///
/// Banning signs the user out everywhere.
async fn update_user_status(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UserStatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .user_service
        .set_status(&admin.0, id, body.status)
        .await?;
    Ok(Json(user.into()))
}

/// POST /api/v1/admin/maintenance - Release expired locks, prune sessions
/// and reset attempts, dispatch due notifications
async fn run_maintenance(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
) -> Json<MaintenanceReport> {
    let report = state.maintenance.run_once(Utc::now()).await;
    tracing::info!(by = admin.0.id, ?report, "Maintenance run on demand");
    Json(report)
}
