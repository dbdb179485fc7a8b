//! Booking API endpoints
//!
//! A booking is made in two steps: lock a slot, then confirm the lock.
//! - POST /api/v1/bookings/locks - Lock a slot with a mentor
//! - DELETE /api/v1/bookings/locks/{id} - Release own lock
//! - POST /api/v1/bookings/locks/{id}/confirm - Turn the lock into a session
//! - GET /api/v1/bookings?role=mentor|mentee - Own sessions
//! - POST /api/v1/bookings/{id}/cancel - Cancel before start
//! - POST /api/v1/bookings/{id}/complete - Mentor marks it done

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{AcquireLockInput, ConfirmBookingInput, MentorSession, ParticipantRole};

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default)]
    pub role: ParticipantRole,
}

/// Build booking routes (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/locks", post(acquire_lock))
        .route("/locks/{id}", delete(release_lock))
        .route("/locks/{id}/confirm", post(confirm_booking))
        .route("/{id}/cancel", post(cancel_session))
        .route("/{id}/complete", post(complete_session))
}

async fn acquire_lock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<AcquireLockInput>,
) -> Result<impl IntoResponse, ApiError> {
    let lock = state.mentoring_service.acquire_lock(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(lock)))
}

async fn release_lock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.mentoring_service.release_lock(&user.0, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<ConfirmBookingInput>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .mentoring_service
        .confirm_booking(&user.0, &id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<MentorSession>>, ApiError> {
    Ok(Json(
        state
            .mentoring_service
            .list_sessions(&user.0, query.role)
            .await?,
    ))
}

async fn cancel_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MentorSession>, ApiError> {
    Ok(Json(
        state.mentoring_service.cancel_session(&user.0, id).await?,
    ))
}

async fn complete_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MentorSession>, ApiError> {
    Ok(Json(
        state.mentoring_service.complete_session(&user.0, id).await?,
    ))
}
