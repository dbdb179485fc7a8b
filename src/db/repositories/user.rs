//! User repository
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and PostgreSQL

use crate::config::DatabaseDriver;
use crate::db::{with_pool, DynDatabasePool};
use crate::models::{ListParams, NewUser, User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, role, status, headline, created_at, updated_at";

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &NewUser) -> Result<User>;

    /// Create a self-registered account: admin when the table is empty,
    /// `user.role` otherwise. The check and the insert are atomic.
    async fn create_registered(&self, user: &NewUser) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Look up by email; callers pass the normalized (lowercased) address
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn update_profile(
        &self,
        id: i64,
        display_name: &str,
        headline: Option<&str>,
    ) -> Result<()>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool>;

    async fn count(&self) -> Result<i64>;

    /// List users oldest first, returning the page and the total count
    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO users (email, display_name, password_hash, role, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            USER_COLUMNS
        );
        let created = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, User>(&sql)
                .bind(&user.email)
                .bind(&user.display_name)
                .bind(&user.password_hash)
                .bind(user.role.to_string())
                .bind(UserStatus::Active.to_string())
                .bind(now)
                .bind(now)
                .fetch_one(conn)
                .await
                .context("Failed to create user")?
        });
        Ok(created)
    }

    async fn create_registered(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO users (email, display_name, password_hash, role, status, created_at, updated_at) \
             VALUES ($1, $2, $3, CASE WHEN EXISTS (SELECT 1 FROM users) THEN $4 ELSE $5 END, $6, $7, $8) \
             RETURNING {}",
            USER_COLUMNS
        );
        // SQLite runs the statement under its single writer lock; PostgreSQL
        // needs a self-conflicting table lock to serialize registrations.
        let lock_table = self.pool.driver() == DatabaseDriver::Postgres;
        let created = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;
            if lock_table {
                sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
                    .execute(&mut *tx)
                    .await
                    .context("Failed to lock users table")?;
            }
            let created = sqlx::query_as::<_, User>(&sql)
                .bind(&user.email)
                .bind(&user.display_name)
                .bind(&user.password_hash)
                .bind(user.role.to_string())
                .bind(UserRole::Admin.to_string())
                .bind(UserStatus::Active.to_string())
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to create user")?;
            tx.commit().await.context("Failed to commit new user")?;
            created
        });
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get user by ID")?
        });
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let user = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(conn)
                .await
                .context("Failed to get user by email")?
        });
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: i64,
        display_name: &str,
        headline: Option<&str>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE users SET display_name = $1, headline = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(display_name)
            .bind(headline)
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to update user profile")?;
        });
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
                .bind(password_hash)
                .bind(Utc::now())
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to update password")?;
        });
        Ok(())
    }

    async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool> {
        let result = with_pool!(self.pool, |conn| {
            sqlx::query("UPDATE users SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(status.to_string())
                .bind(Utc::now())
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to update user status")?
                .rows_affected()
        });
        Ok(result > 0)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = with_pool!(self.pool, |conn| {
            sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(conn)
                .await
                .context("Failed to count users")?
        });
        Ok(count)
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY id ASC LIMIT $1 OFFSET $2",
            USER_COLUMNS
        );
        let users = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, User>(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list users")?
        });
        let total = self.count().await?;
        Ok((users, total))
    }
}
