//! Community API endpoints
//!
//! Posts, threaded comments and likes:
//! - GET /api/v1/posts - Paginated, newest first
//! - POST /api/v1/posts - Create (auth)
//! - GET /api/v1/posts/{id} - Post with comments
//! - PUT /api/v1/posts/{id} - Edit (author)
//! - DELETE /api/v1/posts/{id} - Delete (author or admin)
//! - POST /api/v1/posts/{id}/comments - Comment or reply (auth)
//! - DELETE /api/v1/posts/{id}/comments/{cid} - Delete comment (author or admin)
//! - POST/DELETE /api/v1/posts/{id}/like - Like / unlike (auth)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::api::responses::CountResponse;
use crate::models::{
    CreateCommentInput, CreatePostInput, PagedResult, Post, PostDetail, UpdatePostInput,
};
use crate::services::CommunityServiceError;

impl From<CommunityServiceError> for ApiError {
    fn from(err: CommunityServiceError) -> Self {
        match err {
            CommunityServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CommunityServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            CommunityServiceError::Forbidden(_) => ApiError::forbidden(err.to_string()),
            CommunityServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

/// Build public post routes (used with optional auth)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts))
        .route("/{id}", get(get_post))
}

/// Build protected post routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_post))
        .route("/{id}", axum::routing::put(update_post).delete(delete_post))
        .route("/{id}/comments", post(add_comment))
        .route("/{id}/comments/{comment_id}", delete(delete_comment))
        .route("/{id}/like", post(like_post).delete(unlike_post))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    Ok(Json(
        state.community_service.list_posts(query.params()).await?,
    ))
}

/// GET /api/v1/posts/{id} - `liked` reflects the caller when signed in
async fn get_post(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(
        state
            .community_service
            .get_post(id, viewer.as_ref())
            .await?,
    ))
}

async fn create_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreatePostInput>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state.community_service.create_post(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdatePostInput>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(
        state.community_service.update_post(&user.0, id, body).await?,
    ))
}

async fn delete_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.community_service.delete_post(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<CreateCommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.community_service.add_comment(&user.0, id, body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((id, comment_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state
        .community_service
        .delete_comment(&user.0, id, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.community_service.like(&user.0, id).await?;
    Ok(Json(CountResponse { count }))
}

async fn unlike_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.community_service.unlike(&user.0, id).await?;
    Ok(Json(CountResponse { count }))
}
