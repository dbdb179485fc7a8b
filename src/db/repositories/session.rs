//! Session repository
//!
//! Database operations for login sessions.

use crate::db::{with_pool, DynDatabasePool};
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID (token)
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all sessions for a user, returning how many were removed
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete every session of a user except `keep_id`
    async fn delete_others(&self, user_id: i64, keep_id: &str) -> Result<u64>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.expires_at)
            .bind(session.created_at)
            .execute(conn)
            .await
            .context("Failed to create session")?;
        });
        Ok(session.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let session = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Session>(
                "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(conn)
            .await
            .context("Failed to get session by ID")?
        });
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete session")?;
        });
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .execute(conn)
                .await
                .context("Failed to delete sessions by user")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn delete_others(&self, user_id: i64, keep_id: &str) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND id <> $2")
                .bind(user_id)
                .bind(keep_id)
                .execute(conn)
                .await
                .context("Failed to delete other sessions")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
                .bind(now)
                .execute(conn)
                .await
                .context("Failed to delete expired sessions")?
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

    async fn setup() -> (SqlxSessionRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let user = SqlxUserRepository::new(pool.clone())
            .create(&NewUser {
                email: "s@example.com".to_string(),
                display_name: "S".to_string(),
                password_hash: "hash".to_string(),
                role: UserRole::Member,
            })
            .await
            .expect("Failed to create user");
        (SqlxSessionRepository::new(pool), user.id)
    }

    fn session(id: &str, user_id: i64, ttl: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (repo, user_id) = setup().await;
        repo.create(&session("tok1", user_id, Duration::days(1)))
            .await
            .unwrap();

        let found = repo.get_by_id("tok1").await.unwrap().expect("session");
        assert_eq!(found.user_id, user_id);
        assert!(!found.is_expired());

        repo.delete("tok1").await.unwrap();
        assert!(repo.get_by_id("tok1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_others_keeps_current() {
        let (repo, user_id) = setup().await;
        for id in ["a", "b", "c"] {
            repo.create(&session(id, user_id, Duration::days(1)))
                .await
                .unwrap();
        }

        assert_eq!(repo.delete_others(user_id, "b").await.unwrap(), 2);
        assert!(repo.get_by_id("b").await.unwrap().is_some());
        assert!(repo.get_by_id("a").await.unwrap().is_none());

        assert_eq!(repo.delete_by_user(user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (repo, user_id) = setup().await;
        repo.create(&session("old", user_id, Duration::hours(-1)))
            .await
            .unwrap();
        repo.create(&session("new", user_id, Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(repo.get_by_id("old").await.unwrap().is_none());
        assert!(repo.get_by_id("new").await.unwrap().is_some());
    }
}
