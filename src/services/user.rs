//! User service
//!
//! Registration (the first account becomes admin), login and logout,
//! session validation, profile and password changes, and the account
//! administration used by the admin API.

use crate::cache::MemoryCache;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{
    ListParams, NewUser, PagedResult, RegisterInput, Session, UpdateProfileInput, User, UserRole,
    UserStatus,
};
use crate::services::mentoring::DIRECTORY_CACHE_PREFIX;
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use anyhow::Context;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_DISPLAY_NAME_LEN: usize = 80;
pub const MAX_HEADLINE_LEN: usize = 200;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Same error for unknown email and wrong password
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("This account has been banned")]
    Banned,

    #[error("Email '{0}' is already registered")]
    EmailTaken(String),

    #[error("Current password is incorrect")]
    WrongPassword,

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_ttl_days: i64,
    cache: Arc<MemoryCache>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_ttl_days: i64,
        cache: Arc<MemoryCache>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            session_ttl_days,
            cache,
        }
    }

    pub fn session_ttl_days(&self) -> i64 {
        self.session_ttl_days
    }

    /// Register a new account. The very first account is made admin.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let email = normalize_email(&input.email);
        validate_email(&email)?;
        validate_password(&input.password)?;
        let display_name = validate_display_name(&input.display_name)?;

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::EmailTaken(email));
        }

        let password_hash = hash_password(&input.password)?;

        let user = self
            .user_repo
            .create_registered(&NewUser {
                email,
                display_name,
                password_hash,
                role: UserRole::Member,
            })
            .await?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Check credentials and open a new session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, Session), UserServiceError> {
        let email = normalize_email(email);
        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to get user by email")?
            .ok_or(UserServiceError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(UserServiceError::InvalidCredentials);
        }
        if user.is_banned() {
            return Err(UserServiceError::Banned);
        }

        let session = self.create_session(user.id).await?;
        Ok((user, session))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo.delete(token).await?;
        Ok(())
    }

    /// Resolve a session token to its user. Expired sessions are deleted
    /// and treated as absent.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo.delete(token).await?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;
        Ok(user)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.user_repo.get_by_id(id).await?)
    }

    pub async fn update_profile(
        &self,
        user: &User,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let display_name = match input.display_name {
            Some(name) => validate_display_name(&name)?,
            None => user.display_name.clone(),
        };
        let headline = match input.headline {
            Some(headline) => {
                let headline = headline.trim();
                if headline.chars().count() > MAX_HEADLINE_LEN {
                    return Err(UserServiceError::ValidationError(format!(
                        "Headline must be at most {} characters",
                        MAX_HEADLINE_LEN
                    )));
                }
                (!headline.is_empty()).then(|| headline.to_string())
            }
            None => user.headline.clone(),
        };

        self.user_repo
            .update_profile(user.id, &display_name, headline.as_deref())
            .await?;
        self.invalidate_mentor_directory();
        self.user_repo
            .get_by_id(user.id)
            .await?
            .ok_or(UserServiceError::NotFound)
    }

    /// Change the password after checking the current one. Every other
    /// session of the user is revoked; `current_session` stays valid.
    pub async fn change_password(
        &self,
        user: &User,
        current_session: Option<&str>,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        if !verify_password(current_password, &user.password_hash)? {
            return Err(UserServiceError::WrongPassword);
        }
        validate_password(new_password)?;

        let hash = hash_password(new_password)?;
        self.user_repo.update_password(user.id, &hash).await?;

        let revoked = match current_session {
            Some(keep) => self.session_repo.delete_others(user.id, keep).await?,
            None => self.session_repo.delete_by_user(user.id).await?,
        };
        tracing::info!(user_id = user.id, revoked, "Password changed");
        Ok(())
    }

    /// Replace the password without checking the old one (reset flow) and
    /// revoke every session
    pub async fn reset_password(&self, user_id: i64, new_password: &str) -> Result<(), UserServiceError> {
        validate_password(new_password)?;
        let hash = hash_password(new_password)?;
        self.user_repo.update_password(user_id, &hash).await?;
        self.session_repo.delete_by_user(user_id).await?;
        Ok(())
    }

    pub async fn list_users(&self, params: ListParams) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self.user_repo.list(&params).await?;
        Ok(PagedResult::new(users, total, &params))
    }

    /// Ban or reinstate an account. Banning revokes all of its sessions.
    pub async fn set_status(
        &self,
        actor: &User,
        user_id: i64,
        status: UserStatus,
    ) -> Result<User, UserServiceError> {
        if actor.id == user_id && status == UserStatus::Banned {
            return Err(UserServiceError::ValidationError(
                "You cannot ban yourself".to_string(),
            ));
        }
        if !self.user_repo.set_status(user_id, status).await? {
            return Err(UserServiceError::NotFound);
        }
        if status == UserStatus::Banned {
            let revoked = self.session_repo.delete_by_user(user_id).await?;
            tracing::warn!(user_id, by = actor.id, revoked, "User banned");
        }
        self.invalidate_mentor_directory();
        self.user_repo
            .get_by_id(user_id)
            .await?
            .ok_or(UserServiceError::NotFound)
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let count = self
            .session_repo
            .delete_expired(Utc::now())
            .await
            .context("Failed to delete expired sessions")?;
        Ok(count)
    }

    /// Display names and account status are part of the mentor directory
    fn invalidate_mentor_directory(&self) {
        if let Err(e) = self.cache.delete_prefix(DIRECTORY_CACHE_PREFIX) {
            tracing::warn!("Failed to invalidate mentor directory cache: {}", e);
        }
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(self.session_ttl_days),
            created_at: now,
        };
        Ok(self.session_repo.create(&session).await?)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    if !EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email)) {
        return Err(UserServiceError::ValidationError(
            "Invalid email format".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), UserServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> Result<String, UserServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Display name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(UserServiceError::ValidationError(format!(
            "Display name must be at most {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name.to_string())
}
