//! Database migrations
//!
//! Migrations are embedded in the binary as SQL strings, one variant per
//! backend. Each migration runs inside its own transaction together with
//! the `_migrations` bookkeeping row, so a failed migration leaves no trace.

use anyhow::{Context, Result};
use chrono::Utc;

use super::{with_pool, DynDatabasePool};
use crate::config::DatabaseDriver;

/// A database migration with SQL for both backends
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i64,
    /// Human-readable migration name
    pub name: &'static str,
    pub up_sqlite: &'static str,
    pub up_postgres: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                display_name VARCHAR(80) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                headline VARCHAR(200),
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                email VARCHAR(255) NOT NULL UNIQUE,
                display_name VARCHAR(80) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                headline VARCHAR(200),
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_password_reset",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS password_reset_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL,
                ip_address VARCHAR(64),
                created_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reset_attempts_email ON password_reset_attempts(email, created_at);
            CREATE INDEX IF NOT EXISTS idx_reset_attempts_ip ON password_reset_attempts(ip_address, created_at);
            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                token_hash VARCHAR(64) NOT NULL UNIQUE,
                expires_at TIMESTAMP NOT NULL,
                used_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_reset_tokens_user_id ON password_reset_tokens(user_id);
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS password_reset_attempts (
                id BIGSERIAL PRIMARY KEY,
                email VARCHAR(255) NOT NULL,
                ip_address VARCHAR(64),
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reset_attempts_email ON password_reset_attempts(email, created_at);
            CREATE INDEX IF NOT EXISTS idx_reset_attempts_ip ON password_reset_attempts(ip_address, created_at);
            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash VARCHAR(64) NOT NULL UNIQUE,
                expires_at TIMESTAMPTZ NOT NULL,
                used_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reset_tokens_user_id ON password_reset_tokens(user_id);
        "#,
    },
    Migration {
        version: 4,
        name: "create_documents",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS documents (
                id VARCHAR(36) PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                file_name VARCHAR(255) NOT NULL,
                content_type VARCHAR(255) NOT NULL,
                size_bytes INTEGER NOT NULL,
                storage_key VARCHAR(512) NOT NULL UNIQUE,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, created_at);
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS documents (
                id VARCHAR(36) PRIMARY KEY,
                owner_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                file_name VARCHAR(255) NOT NULL,
                content_type VARCHAR(255) NOT NULL,
                size_bytes BIGINT NOT NULL,
                storage_key VARCHAR(512) NOT NULL UNIQUE,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, created_at);
        "#,
    },
    Migration {
        version: 5,
        name: "create_mentoring",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS mentor_profiles (
                user_id INTEGER PRIMARY KEY,
                headline VARCHAR(200) NOT NULL,
                bio TEXT NOT NULL,
                hourly_rate_cents INTEGER NOT NULL DEFAULT 0,
                accepting_bookings BOOLEAN NOT NULL DEFAULT 1,
                booking_version INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS slot_locks (
                id VARCHAR(36) PRIMARY KEY,
                mentor_id INTEGER NOT NULL,
                mentee_id INTEGER NOT NULL,
                start_at TIMESTAMP NOT NULL,
                end_at TIMESTAMP NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (mentor_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (mentee_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_slot_locks_mentor ON slot_locks(mentor_id, start_at);
            CREATE INDEX IF NOT EXISTS idx_slot_locks_expires ON slot_locks(expires_at);
            CREATE TABLE IF NOT EXISTS mentor_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mentor_id INTEGER NOT NULL,
                mentee_id INTEGER NOT NULL,
                start_at TIMESTAMP NOT NULL,
                end_at TIMESTAMP NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'confirmed',
                price_cents INTEGER NOT NULL DEFAULT 0,
                payment_reference VARCHAR(255),
                note TEXT,
                cancelled_by INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (mentor_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (mentee_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_mentor_sessions_mentor ON mentor_sessions(mentor_id, start_at);
            CREATE INDEX IF NOT EXISTS idx_mentor_sessions_mentee ON mentor_sessions(mentee_id, start_at);
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS mentor_profiles (
                user_id BIGINT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                headline VARCHAR(200) NOT NULL,
                bio TEXT NOT NULL,
                hourly_rate_cents BIGINT NOT NULL DEFAULT 0,
                accepting_bookings BOOLEAN NOT NULL DEFAULT TRUE,
                booking_version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE TABLE IF NOT EXISTS slot_locks (
                id VARCHAR(36) PRIMARY KEY,
                mentor_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                mentee_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                start_at TIMESTAMPTZ NOT NULL,
                end_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_slot_locks_mentor ON slot_locks(mentor_id, start_at);
            CREATE INDEX IF NOT EXISTS idx_slot_locks_expires ON slot_locks(expires_at);
            CREATE TABLE IF NOT EXISTS mentor_sessions (
                id BIGSERIAL PRIMARY KEY,
                mentor_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                mentee_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                start_at TIMESTAMPTZ NOT NULL,
                end_at TIMESTAMPTZ NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'confirmed',
                price_cents BIGINT NOT NULL DEFAULT 0,
                payment_reference VARCHAR(255),
                note TEXT,
                cancelled_by BIGINT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mentor_sessions_mentor ON mentor_sessions(mentor_id, start_at);
            CREATE INDEX IF NOT EXISTS idx_mentor_sessions_mentee ON mentor_sessions(mentee_id, start_at);
        "#,
    },
    Migration {
        version: 6,
        name: "create_community",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                title VARCHAR(200) NOT NULL,
                body TEXT NOT NULL,
                comment_count INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE TABLE IF NOT EXISTS post_comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                parent_id INTEGER,
                body TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES post_comments(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_post_comments_post ON post_comments(post_id, created_at);
            CREATE TABLE IF NOT EXISTS post_likes (
                post_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (post_id, user_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGSERIAL PRIMARY KEY,
                author_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title VARCHAR(200) NOT NULL,
                body TEXT NOT NULL,
                comment_count BIGINT NOT NULL DEFAULT 0,
                like_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE TABLE IF NOT EXISTS post_comments (
                id BIGSERIAL PRIMARY KEY,
                post_id BIGINT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                author_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                parent_id BIGINT REFERENCES post_comments(id) ON DELETE CASCADE,
                body TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_post_comments_post ON post_comments(post_id, created_at);
            CREATE TABLE IF NOT EXISTS post_likes (
                post_id BIGINT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (post_id, user_id)
            );
        "#,
    },
    Migration {
        version: 7,
        name: "create_notifications",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind VARCHAR(40) NOT NULL,
                group_key VARCHAR(200) NOT NULL,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL,
                link VARCHAR(512),
                count INTEGER NOT NULL DEFAULT 1,
                read_at TIMESTAMP,
                deliver_after TIMESTAMP NOT NULL,
                delivered_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, updated_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_group ON notifications(user_id, group_key);
            CREATE INDEX IF NOT EXISTS idx_notifications_delivery ON notifications(delivered_at, deliver_after);
            CREATE TABLE IF NOT EXISTS notification_preferences (
                user_id INTEGER PRIMARY KEY,
                push_enabled BOOLEAN NOT NULL DEFAULT 1,
                quiet_start_minute INTEGER,
                quiet_end_minute INTEGER,
                utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_postgres: r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind VARCHAR(40) NOT NULL,
                group_key VARCHAR(200) NOT NULL,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL,
                link VARCHAR(512),
                count BIGINT NOT NULL DEFAULT 1,
                read_at TIMESTAMPTZ,
                deliver_after TIMESTAMPTZ NOT NULL,
                delivered_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, updated_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_group ON notifications(user_id, group_key);
            CREATE INDEX IF NOT EXISTS idx_notifications_delivery ON notifications(delivered_at, deliver_after);
            CREATE TABLE IF NOT EXISTS notification_preferences (
                user_id BIGINT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                push_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                quiet_start_minute BIGINT,
                quiet_end_minute BIGINT,
                utc_offset_minutes BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations, returning how many were applied
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = applied_versions(pool).await?;
    let mut count = 0;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!(
            "Applying migration {}: {}",
            migration.version,
            migration.name
        );
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL
            )
            "#
        }
        DatabaseDriver::Postgres => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn applied_versions(pool: &DynDatabasePool) -> Result<Vec<i64>> {
    let versions: Vec<i64> = with_pool!(pool, |conn| {
        sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
            .fetch_all(conn)
            .await?
    });
    Ok(versions)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Postgres => migration.up_postgres,
    };

    with_pool!(pool, |conn| {
        let mut tx = conn.begin().await?;
        for statement in split_sql_statements(sql) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
        }
        sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES ($1, $2, $3)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    });

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    Ok(pending_count(pool).await? == 0)
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count())
}

pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}
