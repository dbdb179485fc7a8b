//! Authentication API endpoints
//!
//! Handles HTTP requests for accounts and sessions:
//! - POST /api/v1/auth/register - Create an account (first one is admin)
//! - POST /api/v1/auth/login - Sign in
//! - POST /api/v1/auth/logout - Sign out
//! - GET /api/v1/auth/me - Current user
//! - PUT /api/v1/auth/profile - Update display name / headline
//! - PUT /api/v1/auth/password - Change password
//! - POST /api/v1/auth/password-reset - Mail a reset link
//! - POST /api/v1/auth/password-reset/confirm - Set a new password from a link

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, ClientIp, SessionToken};
use crate::api::responses::{AuthResponse, MessageResponse, UserResponse};
use crate::models::{RegisterInput, UpdateProfileInput};
use crate::services::password_reset::PasswordResetError;
use crate::services::user::{normalize_email, UserServiceError};

const CLEAR_SESSION_COOKIE: &str = "session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for changing password
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            UserServiceError::Banned => ApiError::banned(),
            UserServiceError::EmailTaken(_) => ApiError::conflict(err.to_string()),
            UserServiceError::WrongPassword => ApiError::validation_error(err.to_string()),
            UserServiceError::NotFound => ApiError::not_found(err.to_string()),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<PasswordResetError> for ApiError {
    fn from(err: PasswordResetError) -> Self {
        match err {
            PasswordResetError::ValidationError(msg) => ApiError::validation_error(msg),
            PasswordResetError::RateLimited { retry_after } => {
                ApiError::rate_limited(err.to_string(), retry_after)
            }
            PasswordResetError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/password-reset", post(request_password_reset))
        .route("/password-reset/confirm", post(confirm_password_reset))
}

fn session_cookie(token: &str, ttl_days: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token,
        ttl_days * 24 * 60 * 60
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?,
    );
    Ok(headers)
}

/// POST /api/v1/auth/register - User registration
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state
        .user_service
        .register(RegisterInput {
            email: body.email,
            password: body.password,
            display_name: body.display_name,
        })
        .await?;

    let (user, session) = state.user_service.login(&user.email, &password).await?;
    let headers = session_cookie(&session.id, state.user_service.session_ttl_days())?;

    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/login - User login
///
/// Throttled per client IP (10 requests per minute) and per email
/// (5 failures per 15 minutes).
async fn login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&body.email);

    if let Some(ip) = client_ip {
        if let Some(retry_after) = state.rate_limiter.ip_retry_after(ip).await {
            tracing::warn!(%ip, "Login rate limited by IP");
            return Err(ApiError::rate_limited(
                "Too many requests, please try again later",
                retry_after,
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    if let Some(retry_after) = state.rate_limiter.email_retry_after(&email).await {
        tracing::warn!(email = %email, "Login rate limited by email");
        return Err(ApiError::rate_limited(
            "Too many failed attempts, please try again later",
            retry_after,
        ));
    }

    let (user, session) = match state.user_service.login(&email, &body.password).await {
        Ok(result) => result,
        Err(err) => {
            if matches!(
                err,
                UserServiceError::InvalidCredentials | UserServiceError::Banned
            ) {
                state.rate_limiter.record_failed_attempt(&email).await;
                tracing::warn!(email = %email, reason = %err, "Login failed");
            }
            return Err(err.into());
        }
    };

    state.rate_limiter.clear_email_attempts(&email).await;
    tracing::info!(user_id = user.id, "User logged in");

    let headers = session_cookie(&session.id, state.user_service.session_ttl_days())?;
    Ok((
        headers,
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/logout - User logout
async fn logout(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&token).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static(CLEAR_SESSION_COOKIE),
    );

    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/me - Get current user
async fn get_current_user(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.0.into())
}

/// PUT /api/v1/auth/profile - Update current user's profile
async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserResponse>, ApiError> {
    let updated = state.user_service.update_profile(&user.0, body).await?;
    Ok(Json(updated.into()))
}

/// PUT /api/v1/auth/password - Change current user's password
///
/// The session making the request stays signed in; every other one is revoked.
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_service
        .change_password(
            &user.0,
            Some(&token),
            &body.current_password,
            &body.new_password,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/password-reset - Request a reset link
///
/// Answers the same way whether or not the account exists.
async fn request_password_reset(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .password_reset_service
        .request_reset(&body.email, client_ip)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the account exists, a reset link has been sent",
        )),
    ))
}

/// POST /api/v1/auth/password-reset/confirm - Set a new password
async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .password_reset_service
        .confirm_reset(&body.token, &body.new_password)
        .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static(CLEAR_SESSION_COOKIE),
    );
    Ok((StatusCode::NO_CONTENT, response_headers))
}
