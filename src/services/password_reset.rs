//! Password reset service
//!
//! Every request is recorded before it is checked, so a client hammering
//! the endpoint keeps extending its own lockout. Requests for unknown or
//! banned accounts succeed without sending anything.

use crate::config::PasswordResetConfig;
use crate::db::repositories::{PasswordResetRepository, SessionRepository, UserRepository};
use crate::services::email::Mailer;
use crate::services::password::{generate_token, hash_password, hash_token, MIN_PASSWORD_LEN};
use crate::services::rate_limiter::retry_after;
use crate::services::user::normalize_email;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PasswordResetError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Too many password reset requests, retry in {retry_after} seconds")]
    RateLimited { retry_after: i64 },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

const INVALID_TOKEN: &str = "Reset token is invalid or expired";

pub struct PasswordResetService {
    reset_repo: Arc<dyn PasswordResetRepository>,
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    mailer: Arc<dyn Mailer>,
    config: PasswordResetConfig,
}

impl PasswordResetService {
    pub fn new(
        reset_repo: Arc<dyn PasswordResetRepository>,
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        mailer: Arc<dyn Mailer>,
        config: PasswordResetConfig,
    ) -> Self {
        Self {
            reset_repo,
            user_repo,
            session_repo,
            mailer,
            config,
        }
    }

    fn window(&self) -> Duration {
        Duration::minutes(self.config.window_minutes)
    }

    /// Start a reset for `email`.
    ///
    /// Fails only on malformed input or when the email or the IP is over
    /// its limit; otherwise the caller learns nothing about the account.
    pub async fn request_reset(
        &self,
        email: &str,
        ip: Option<IpAddr>,
    ) -> Result<(), PasswordResetError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(PasswordResetError::ValidationError(
                "Email is required".to_string(),
            ));
        }

        let now = Utc::now();
        let ip = ip.map(|ip| ip.to_string());
        self.reset_repo
            .record_attempt(&email, ip.as_deref(), now)
            .await?;

        let since = now - self.window();
        let mut by_email = self.reset_repo.attempts_for_email(&email, since).await?;
        if let Some(wait) = self.over_limit(&mut by_email, self.config.max_attempts_per_email, now) {
            tracing::warn!(email = %email, retry_after = wait, "Password reset rate limited by email");
            return Err(PasswordResetError::RateLimited { retry_after: wait });
        }
        if let Some(ip) = ip.as_deref() {
            let mut by_ip = self.reset_repo.attempts_for_ip(ip, since).await?;
            if let Some(wait) = self.over_limit(&mut by_ip, self.config.max_attempts_per_ip, now) {
                tracing::warn!(ip = %ip, retry_after = wait, "Password reset rate limited by IP");
                return Err(PasswordResetError::RateLimited { retry_after: wait });
            }
        }

        let user = match self.user_repo.get_by_email(&email).await? {
            Some(user) if !user.is_banned() => user,
            _ => {
                tracing::debug!(email = %email, "Password reset for unknown or banned account");
                return Ok(());
            }
        };

        self.reset_repo.invalidate_tokens(user.id, now).await?;
        let token = generate_token();
        let expires_at = now + Duration::minutes(self.config.token_ttl_minutes);
        self.reset_repo
            .create_token(user.id, &hash_token(&token), expires_at, now)
            .await?;

        let link = format!(
            "{}?token={}",
            self.config.reset_url_base,
            urlencoding::encode(&token)
        );
        let body = format!(
            "Hi {},\n\nUse the link below to choose a new password. It expires in {} minutes.\n\n{}\n\nIf you did not ask for this, ignore this message.\n",
            user.display_name, self.config.token_ttl_minutes, link
        );

        // A mail failure must look the same as an unknown address
        if let Err(e) = self
            .mailer
            .send(&user.email, "Reset your CareerHub password", &body)
            .await
        {
            tracing::error!(user_id = user.id, "Failed to send password reset mail: {:#}", e);
        } else {
            tracing::info!(user_id = user.id, "Password reset mail sent");
        }
        Ok(())
    }

    /// Finish a reset: set the new password and sign the user out everywhere
    pub async fn confirm_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), PasswordResetError> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PasswordResetError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let now = Utc::now();
        let stored = self
            .reset_repo
            .find_token(&hash_token(token.trim()))
            .await?
            .filter(|stored| stored.is_usable_at(now))
            .ok_or_else(|| PasswordResetError::ValidationError(INVALID_TOKEN.to_string()))?;

        if !self.reset_repo.consume_token(stored.id, now).await? {
            return Err(PasswordResetError::ValidationError(INVALID_TOKEN.to_string()));
        }

        let hash = hash_password(new_password)?;
        self.user_repo
            .update_password(stored.user_id, &hash)
            .await
            .context("Failed to store new password")?;
        let revoked = self.session_repo.delete_by_user(stored.user_id).await?;

        tracing::info!(user_id = stored.user_id, revoked, "Password reset completed");
        Ok(())
    }

    /// Drop attempts that left the window and tokens past expiry.
    /// Returns `(attempts, tokens)` removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<(u64, u64), PasswordResetError> {
        let attempts = self
            .reset_repo
            .delete_attempts_before(now - self.window())
            .await?;
        let tokens = self.reset_repo.delete_expired_tokens(now).await?;
        Ok((attempts, tokens))
    }

    /// Limited once the count inside the window exceeds `max`
    fn over_limit(&self, times: &mut Vec<DateTime<Utc>>, max: i64, now: DateTime<Utc>) -> Option<i64> {
        let limit = usize::try_from(max).unwrap_or(0) + 1;
        retry_after(times, limit, self.window(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        SqlxPasswordResetRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{NewUser, Session, UserRole};
    use crate::services::password::verify_password;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_token(&self) -> String {
            let sent = self.sent.lock().unwrap();
            let (_, body) = sent.last().expect("a mail was sent");
            let start = body.find("token=").expect("link in body") + "token=".len();
            body[start..]
                .split_whitespace()
                .next()
                .expect("token")
                .to_string()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, _subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        service: PasswordResetService,
        mailer: Arc<RecordingMailer>,
        pool: DynDatabasePool,
        user_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::boxed(pool.clone());
        let user = users
            .create(&NewUser {
                email: "jo@example.com".to_string(),
                display_name: "Jo".to_string(),
                password_hash: hash_password("old-password").unwrap(),
                role: UserRole::Member,
            })
            .await
            .unwrap();

        let mailer = Arc::new(RecordingMailer::default());
        let service = PasswordResetService::new(
            SqlxPasswordResetRepository::boxed(pool.clone()),
            users,
            SqlxSessionRepository::boxed(pool.clone()),
            mailer.clone(),
            PasswordResetConfig::default(),
        );
        Fixture {
            service,
            mailer,
            pool,
            user_id: user.id,
        }
    }

    fn ip(last: u8) -> Option<IpAddr> {
        Some(IpAddr::from([192, 0, 2, last]))
    }

    #[tokio::test]
    async fn test_unknown_email_succeeds_silently() {
        let f = setup().await;
        f.service
            .request_reset("nobody@example.com", ip(1))
            .await
            .unwrap();
        assert_eq!(f.mailer.count(), 0);
    }

    #[tokio::test]
    async fn test_full_reset_flow_revokes_sessions() {
        let f = setup().await;
        let sessions = SqlxSessionRepository::boxed(f.pool.clone());
        let now = Utc::now();
        sessions
            .create(&Session {
                id: "existing-session".to_string(),
                user_id: f.user_id,
                expires_at: now + Duration::days(1),
                created_at: now,
            })
            .await
            .unwrap();

        f.service.request_reset("Jo@Example.com", ip(1)).await.unwrap();
        assert_eq!(f.mailer.count(), 1);
        let token = f.mailer.last_token();

        f.service.confirm_reset(&token, "brand-new-pass").await.unwrap();

        let user = SqlxUserRepository::new(f.pool.clone())
            .get_by_id(f.user_id)
            .await
            .unwrap()
            .unwrap();
        assert!(verify_password("brand-new-pass", &user.password_hash).unwrap());
        assert!(sessions.get_by_id("existing-session").await.unwrap().is_none());

        // single use
        assert!(matches!(
            f.service.confirm_reset(&token, "another-pass").await,
            Err(PasswordResetError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_new_request_invalidates_previous_token() {
        let f = setup().await;
        f.service.request_reset("jo@example.com", ip(1)).await.unwrap();
        let first = f.mailer.last_token();
        f.service.request_reset("jo@example.com", ip(1)).await.unwrap();
        let second = f.mailer.last_token();
        assert_ne!(first, second);

        assert!(f.service.confirm_reset(&first, "brand-new-pass").await.is_err());
        assert!(f.service.confirm_reset(&second, "brand-new-pass").await.is_ok());
    }

    #[tokio::test]
    async fn test_email_limit_allows_three_then_limits() {
        let f = setup().await;
        for _ in 0..3 {
            f.service.request_reset("jo@example.com", ip(1)).await.unwrap();
        }
        match f.service.request_reset("jo@example.com", ip(1)).await {
            Err(PasswordResetError::RateLimited { retry_after }) => {
                assert!(retry_after > 0 && retry_after <= 60 * 60);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(f.mailer.count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_emails_are_also_limited() {
        let f = setup().await;
        for _ in 0..3 {
            f.service.request_reset("ghost@example.com", None).await.unwrap();
        }
        assert!(matches!(
            f.service.request_reset("ghost@example.com", None).await,
            Err(PasswordResetError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_ip_limit_spans_emails() {
        let f = setup().await;
        for i in 0..10 {
            f.service
                .request_reset(&format!("user{}@example.com", i), ip(7))
                .await
                .unwrap();
        }
        assert!(matches!(
            f.service.request_reset("user99@example.com", ip(7)).await,
            Err(PasswordResetError::RateLimited { .. })
        ));
        f.service
            .request_reset("user99@example.com", ip(8))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let f = setup().await;
        let repo = SqlxPasswordResetRepository::new(f.pool.clone());
        let now = Utc::now();
        repo.create_token(
            f.user_id,
            &hash_token("stale-token"),
            now - Duration::minutes(1),
            now - Duration::minutes(31),
        )
        .await
        .unwrap();

        let err = f
            .service
            .confirm_reset("stale-token", "brand-new-pass")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Validation error: {}", INVALID_TOKEN));
    }

    #[tokio::test]
    async fn test_short_password_rejected_before_token_lookup() {
        let f = setup().await;
        f.service.request_reset("jo@example.com", None).await.unwrap();
        let token = f.mailer.last_token();
        assert!(f.service.confirm_reset(&token, "short").await.is_err());
        // token still usable
        assert!(f.service.confirm_reset(&token, "long-enough").await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_tokens() {
        let f = setup().await;
        let repo = SqlxPasswordResetRepository::new(f.pool.clone());
        let now = Utc::now();
        repo.create_token(f.user_id, "deadbeef", now - Duration::minutes(5), now - Duration::hours(1))
            .await
            .unwrap();
        f.service.request_reset("jo@example.com", None).await.unwrap();

        let (attempts, tokens) = f.service.cleanup(now).await.unwrap();
        assert_eq!(attempts, 0);
        assert_eq!(tokens, 1);

        let (attempts, _) = f.service.cleanup(now + Duration::hours(2)).await.unwrap();
        assert_eq!(attempts, 1);
    }
}
