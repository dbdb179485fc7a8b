//! Password reset repository
//!
//! Reset attempts are kept in the database (not in memory) so the limit
//! holds across restarts and across several server instances.

use crate::db::{with_pool, DynDatabasePool};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Stored reset token; only the SHA-256 digest of the secret is kept
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[async_trait]
pub trait PasswordResetRepository: Send + Sync {
    async fn record_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Attempt times for an email after `since`, oldest first
    async fn attempts_for_email(&self, email: &str, since: DateTime<Utc>)
        -> Result<Vec<DateTime<Utc>>>;

    /// Attempt times from an IP after `since`, oldest first
    async fn attempts_for_ip(&self, ip_address: &str, since: DateTime<Utc>)
        -> Result<Vec<DateTime<Utc>>>;

    /// Mark every unused token of the user as used
    async fn invalidate_tokens(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64>;

    async fn create_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn find_token(&self, token_hash: &str) -> Result<Option<PasswordResetToken>>;

    /// Atomically consume a usable token. Returns false when it was already
    /// used or has expired.
    async fn consume_token(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete tokens that expired before `now`
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxPasswordResetRepository {
    pool: DynDatabasePool,
}

impl SqlxPasswordResetRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PasswordResetRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PasswordResetRepository for SqlxPasswordResetRepository {
    async fn record_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO password_reset_attempts (email, ip_address, created_at) VALUES ($1, $2, $3)",
            )
            .bind(email)
            .bind(ip_address)
            .bind(at)
            .execute(conn)
            .await
            .context("Failed to record password reset attempt")?;
        });
        Ok(())
    }

    async fn attempts_for_email(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let times: Vec<DateTime<Utc>> = with_pool!(self.pool, |conn| {
            sqlx::query_scalar(
                "SELECT created_at FROM password_reset_attempts \
                 WHERE email = $1 AND created_at > $2 ORDER BY created_at ASC",
            )
            .bind(email)
            .bind(since)
            .fetch_all(conn)
            .await
            .context("Failed to count reset attempts by email")?
        });
        Ok(times)
    }

    async fn attempts_for_ip(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let times: Vec<DateTime<Utc>> = with_pool!(self.pool, |conn| {
            sqlx::query_scalar(
                "SELECT created_at FROM password_reset_attempts \
                 WHERE ip_address = $1 AND created_at > $2 ORDER BY created_at ASC",
            )
            .bind(ip_address)
            .bind(since)
            .fetch_all(conn)
            .await
            .context("Failed to count reset attempts by IP")?
        });
        Ok(times)
    }

    async fn invalidate_tokens(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64> {
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE password_reset_tokens SET used_at = $1 WHERE user_id = $2 AND used_at IS NULL",
            )
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await
            .context("Failed to invalidate reset tokens")?
            .rows_affected()
        });
        Ok(affected)
    }

    async fn create_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO password_reset_tokens (user_id, token_hash, expires_at, created_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create reset token")?;
        });
        Ok(())
    }

    async fn find_token(&self, token_hash: &str) -> Result<Option<PasswordResetToken>> {
        let token = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, PasswordResetToken>(
                "SELECT id, user_id, token_hash, expires_at, used_at, created_at \
                 FROM password_reset_tokens WHERE token_hash = $1",
            )
            .bind(token_hash)
            .fetch_optional(conn)
            .await
            .context("Failed to find reset token")?
        });
        Ok(token)
    }

    async fn consume_token(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE password_reset_tokens SET used_at = $1 \
                 WHERE id = $2 AND used_at IS NULL AND expires_at > $3",
            )
            .bind(now)
            .bind(id)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to consume reset token")?
            .rows_affected()
        });
        Ok(affected == 1)
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM password_reset_attempts WHERE created_at <= $1")
                .bind(cutoff)
                .execute(conn)
                .await
                .context("Failed to delete old reset attempts")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
                .bind(now)
                .execute(conn)
                .await
                .context("Failed to delete expired reset tokens")?
                .rows_affected()
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewUser, UserRole};
    use chrono::Duration;

    async fn setup() -> (SqlxPasswordResetRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let user = SqlxUserRepository::new(pool.clone())
            .create(&NewUser {
                email: "r@example.com".to_string(),
                display_name: "R".to_string(),
                password_hash: "hash".to_string(),
                role: UserRole::Member,
            })
            .await
            .unwrap();
        (SqlxPasswordResetRepository::new(pool), user.id)
    }

    #[tokio::test]
    async fn test_attempt_windows() {
        let (repo, _) = setup().await;
        let now = Utc::now();

        repo.record_attempt("r@example.com", Some("1.1.1.1"), now - Duration::minutes(90))
            .await
            .unwrap();
        repo.record_attempt("r@example.com", Some("1.1.1.1"), now - Duration::minutes(30))
            .await
            .unwrap();
        repo.record_attempt("other@example.com", Some("1.1.1.1"), now)
            .await
            .unwrap();

        let since = now - Duration::minutes(60);
        let by_email = repo.attempts_for_email("r@example.com", since).await.unwrap();
        assert_eq!(by_email.len(), 1);

        let by_ip = repo.attempts_for_ip("1.1.1.1", since).await.unwrap();
        assert_eq!(by_ip.len(), 2);
        assert!(by_ip[0] < by_ip[1]);

        assert_eq!(repo.delete_attempts_before(since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();

        repo.create_token(user_id, "digest", now + Duration::minutes(30), now)
            .await
            .unwrap();
        let token = repo.find_token("digest").await.unwrap().expect("token");
        assert!(token.is_usable_at(now));

        assert!(repo.consume_token(token.id, now).await.unwrap());
        assert!(!repo.consume_token(token.id, now).await.unwrap());

        let token = repo.find_token("digest").await.unwrap().unwrap();
        assert!(!token.is_usable_at(now));
    }

    #[tokio::test]
    async fn test_expired_token_cannot_be_consumed() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();

        repo.create_token(user_id, "old", now - Duration::minutes(1), now - Duration::minutes(31))
            .await
            .unwrap();
        let token = repo.find_token("old").await.unwrap().unwrap();
        assert!(!repo.consume_token(token.id, now).await.unwrap());

        assert_eq!(repo.delete_expired_tokens(now).await.unwrap(), 1);
        assert!(repo.find_token("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_tokens() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create_token(user_id, "t1", now + Duration::minutes(30), now)
            .await
            .unwrap();
        repo.create_token(user_id, "t2", now + Duration::minutes(30), now)
            .await
            .unwrap();

        assert_eq!(repo.invalidate_tokens(user_id, now).await.unwrap(), 2);
        let token = repo.find_token("t1").await.unwrap().unwrap();
        assert!(token.used_at.is_some());
    }
}
