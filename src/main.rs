//! careerhub - career networking platform backend

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use careerhub::{
    api::{self, AppState},
    config::Config,
    db,
    services::{mailer_from_config, LogPushSender},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "careerhub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting careerhub...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let mailer = mailer_from_config(&config.mail)?;
    let state = AppState::new(pool.clone(), &config, mailer, Arc::new(LogPushSender));

    // Background sweep: expired locks and sessions, due notifications,
    // reset attempts, login limiter
    let interval = Duration::from_secs(config.server.maintenance_interval_seconds.max(1));
    state.maintenance.clone().spawn(interval);
    tracing::info!("Maintenance task running every {:?}", interval);

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    pool.close().await;
    Ok(())
}
