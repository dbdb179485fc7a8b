//! Database layer
//!
//! Database abstraction for careerhub. It supports:
//! - SQLite (default, single-binary deployment and tests)
//! - PostgreSQL (production deployments)
//!
//! Every query is written once with `$N` placeholders, which both backends
//! accept, and dispatched to the typed pool through [`with_pool!`].
//!
//! # Usage
//!
//! ```ignore
//! use careerhub::config::DatabaseConfig;
//! use careerhub::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

/// Evaluate one sqlx expression against whichever backend `$pool` wraps.
///
/// The body is expanded once per backend, so it type-checks against both
/// `SqlitePool` and `PgPool`. The enclosing function must return
/// `anyhow::Result`.
macro_rules! with_pool {
    ($pool:expr, |$conn:ident| $body:expr) => {
        match $pool.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $conn = $pool.sqlite()?;
                $body
            }
            $crate::config::DatabaseDriver::Postgres => {
                let $conn = $pool.postgres()?;
                $body
            }
        }
    };
}

pub(crate) use with_pool;

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, PostgresDatabase,
    SqliteDatabase,
};
