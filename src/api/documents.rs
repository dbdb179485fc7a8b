//! Document API endpoints
//!
//! Uploads go straight to object storage through presigned URLs:
//! - GET /api/v1/documents - List own documents
//! - POST /api/v1/documents - Start an upload, returns a presigned PUT
//! - POST /api/v1/documents/{id}/confirm - Finish an upload
//! - GET /api/v1/documents/{id}/download - Presigned GET link
//! - DELETE /api/v1/documents/{id} - Remove document and object

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CreateUploadInput, Document, PresignedUrl, UploadTicket};
use crate::services::DocumentServiceError;

impl From<DocumentServiceError> for ApiError {
    fn from(err: DocumentServiceError) -> Self {
        match err {
            DocumentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            DocumentServiceError::NotFound => ApiError::not_found(err.to_string()),
            DocumentServiceError::Forbidden => ApiError::forbidden(err.to_string()),
            DocumentServiceError::NotUploaded => ApiError::conflict(err.to_string()),
            DocumentServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

/// Build document routes (requires auth middleware)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_documents).post(create_upload))
        .route("/{id}", delete(delete_document))
        .route("/{id}/confirm", post(confirm_upload))
        .route("/{id}/download", get(download_document))
}

async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.document_service.list(&user.0).await?))
}

/// POST /api/v1/documents - Start an upload
async fn create_upload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateUploadInput>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket: UploadTicket = state.document_service.create_upload(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn confirm_upload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(
        state.document_service.confirm_upload(&user.0, &id).await?,
    ))
}

async fn download_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<PresignedUrl>, ApiError> {
    Ok(Json(state.document_service.download_url(&user.0, &id).await?))
}

async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.document_service.delete(&user.0, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
