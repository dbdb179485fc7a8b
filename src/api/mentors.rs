//! Mentor directory API endpoints
//!
//! - GET /api/v1/mentors - Mentors accepting bookings
//! - GET /api/v1/mentors/{id} - One mentor profile
//! - GET /api/v1/mentors/{id}/busy?from=&to= - Booked and locked ranges
//! - PUT /api/v1/mentors/me - Create or update own profile (auth)

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{BusyInterval, MentorProfile, UpsertMentorProfileInput};
use crate::services::MentoringServiceError;

impl From<MentoringServiceError> for ApiError {
    fn from(err: MentoringServiceError) -> Self {
        match err {
            MentoringServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            MentoringServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            MentoringServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            MentoringServiceError::Conflict(msg) => ApiError::conflict(msg),
            MentoringServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BusyQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Build public mentor routes
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_mentors))
        .route("/{id}", get(get_mentor))
        .route("/{id}/busy", get(busy_intervals))
}

/// Build protected mentor routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", put(upsert_profile))
}

async fn list_mentors(State(state): State<AppState>) -> Result<Json<Vec<MentorProfile>>, ApiError> {
    Ok(Json(state.mentoring_service.list_mentors().await?))
}

async fn get_mentor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MentorProfile>, ApiError> {
    Ok(Json(state.mentoring_service.get_profile(id).await?))
}

/// GET /api/v1/mentors/{id}/busy - Ranges a new booking must avoid
async fn busy_intervals(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<BusyQuery>,
) -> Result<Json<Vec<BusyInterval>>, ApiError> {
    Ok(Json(
        state
            .mentoring_service
            .busy_intervals(id, query.from, query.to)
            .await?,
    ))
}

async fn upsert_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpsertMentorProfileInput>,
) -> Result<Json<MentorProfile>, ApiError> {
    Ok(Json(
        state.mentoring_service.upsert_profile(&user.0, body).await?,
    ))
}
