//! API middleware
//!
//! Contains:
//! - `AppState` shared by every handler
//! - `ApiError`, the JSON error body and its status mapping
//! - Session authentication (`require_auth`, `optional_auth`) and the
//!   admin check (`require_admin`)
//! - Extractors for the authenticated user and the client address

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::cache::create_cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCommunityRepository, SqlxDocumentRepository, SqlxMentoringRepository,
    SqlxNotificationRepository, SqlxPasswordResetRepository, SqlxSessionRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    CommunityService, DocumentService, LocalObjectStore, LoginRateLimiter, Mailer, Maintenance,
    MentoringService, NotificationService, PasswordResetService, Presigner, PushSender,
    UserService,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub password_reset_service: Arc<PasswordResetService>,
    pub document_service: Arc<DocumentService>,
    pub mentoring_service: Arc<MentoringService>,
    pub community_service: Arc<CommunityService>,
    pub notification_service: Arc<NotificationService>,
    pub maintenance: Arc<Maintenance>,
    pub presigner: Arc<Presigner>,
    pub object_store: Arc<LocalObjectStore>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    /// Largest object accepted by the storage endpoint, in bytes
    pub max_upload_bytes: u64,
    pub trust_proxy_headers: bool,
}

impl AppState {
    /// Wire repositories and services over `pool`
    pub fn new(
        pool: DynDatabasePool,
        config: &Config,
        mailer: Arc<dyn Mailer>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        let cache = create_cache(&config.cache);
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());

        let user_service = Arc::new(UserService::new(
            user_repo.clone(),
            session_repo.clone(),
            config.session.ttl_days,
            cache.clone(),
        ));
        let password_reset_service = Arc::new(PasswordResetService::new(
            SqlxPasswordResetRepository::boxed(pool.clone()),
            user_repo,
            session_repo,
            mailer,
            config.password_reset.clone(),
        ));
        let notification_service = Arc::new(NotificationService::new(
            SqlxNotificationRepository::boxed(pool.clone()),
            push,
            config.notifications.group_window_minutes,
        ));
        let mentoring_service = Arc::new(MentoringService::new(
            SqlxMentoringRepository::boxed(pool.clone()),
            notification_service.clone(),
            cache,
            config.booking.clone(),
        ));
        let community_service = Arc::new(CommunityService::new(
            SqlxCommunityRepository::boxed(pool.clone()),
            notification_service.clone(),
        ));

        let presigner = Arc::new(Presigner::new(&config.storage));
        let object_store = Arc::new(LocalObjectStore::new(config.storage.local_path.clone()));
        let document_service = Arc::new(DocumentService::new(
            SqlxDocumentRepository::boxed(pool.clone()),
            object_store.clone(),
            presigner.clone(),
            config.storage.clone(),
        ));

        let rate_limiter = Arc::new(LoginRateLimiter::new());
        let maintenance = Arc::new(Maintenance::new(
            mentoring_service.clone(),
            user_service.clone(),
            notification_service.clone(),
            password_reset_service.clone(),
            rate_limiter.clone(),
        ));

        Self {
            pool,
            user_service,
            password_reset_service,
            document_service,
            mentoring_service,
            community_service,
            notification_service,
            maintenance,
            presigner,
            object_store,
            rate_limiter,
            max_upload_bytes: config.storage.max_file_size,
            trust_proxy_headers: config.server.trust_proxy_headers,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// The caller's user on routes where signing in is optional
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

/// Session token of the current request, set by `require_auth`
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Address the rate limits key on. `None` when neither the socket peer nor
/// a trusted proxy header is known.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

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

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(resolve_client_ip(
            &parts.headers,
            peer,
            state.trust_proxy_headers,
        )))
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts
                .extensions
                .get::<AuthenticatedUser>()
                .map(|user| user.0.clone()),
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

    pub fn banned() -> Self {
        Self::new("USER_BANNED", "This account has been banned")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: i64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    /// Logs the cause; clients only see a generic message
    pub fn internal_error(err: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", err);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "USER_BANNED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "PAYLOAD_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self
            .error
            .details
            .as_ref()
            .and_then(|details| details.get("retry_after"))
            .and_then(|value| value.as_i64());

        let mut response = (status, Json(self)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Session token from `Authorization: Bearer` or the `session` cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().strip_prefix("session="))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(ip) = forwarded.split(',').next().and_then(|ip| ip.trim().parse().ok()) {
            return Some(ip);
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok())
}

/// Forwarding headers win only when the proxy in front is trusted; the
/// socket peer is the fallback either way.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        if let Some(ip) = extract_ip_address(headers) {
            return Some(ip);
        }
    }
    peer
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
        .await
        .map_err(ApiError::internal_error)?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    if user.is_banned() {
        return Err(ApiError::banned());
    }

    request.extensions_mut().insert(SessionToken(token));
    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Attach the user when a valid session is presented, never reject
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_session_token(request.headers()) {
        if let Ok(Some(user)) = state.user_service.validate_session(&token).await {
            if !user.is_banned() {
                request.extensions_mut().insert(AuthenticatedUser(user));
            }
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
