//! Presigned object storage endpoints
//!
//! - PUT /storage/{bucket}/{*key} - Upload an object
//! - GET /storage/{bucket}/{*key} - Download an object
//!
//! Requests carry `expires` and `signature` query parameters issued by the
//! document endpoints; no session is needed.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::services::StorageError;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(_) => ApiError::validation_error(err.to_string()),
            StorageError::Io(e) => ApiError::internal_error(e),
        }
    }
}

/// Build storage routes. Uploads up to `max_upload_bytes` are accepted.
pub fn router(max_upload_bytes: u64) -> Router<AppState> {
    let limit = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/{*path}", get(get_object).put(put_object))
        .layer(DefaultBodyLimit::max(limit))
}

/// Resolve the object key and check the signature for `method`
fn authorize(
    state: &AppState,
    method: &Method,
    path: &str,
    query: &SignedQuery,
) -> Result<String, ApiError> {
    let key = state
        .presigner
        .key_from_path(path)
        .ok_or_else(|| ApiError::not_found("Unknown bucket"))?;

    if !state
        .presigner
        .verify(method.as_str(), key, query.expires, &query.signature, Utc::now())
    {
        tracing::warn!(key = %key, method = %method, "Rejected storage signature");
        return Err(ApiError::forbidden("Invalid or expired signature"));
    }
    Ok(key.to_string())
}

async fn put_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let key = authorize(&state, &Method::PUT, &path, &query)?;
    if body.len() as u64 > state.max_upload_bytes {
        return Err(ApiError::new(
            "PAYLOAD_TOO_LARGE",
            format!("Object exceeds {} bytes", state.max_upload_bytes),
        ));
    }

    state.object_store.put(&key, &body).await?;
    Ok(StatusCode::OK)
}

async fn get_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let key = authorize(&state, &Method::GET, &path, &query)?;
    let data = state
        .object_store
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::not_found("Object not found"))?;

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )],
        data,
    )
        .into_response())
}
