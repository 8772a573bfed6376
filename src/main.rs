//! TaskHub - task management API
//! Mission: Per-user tasks behind tiered throttling and rotating refresh tokens

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use taskhub_backend::{
    config::AppConfig,
    routes::{cors_layer, create_router, AppState},
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::parse();
    let throttle = config.load_throttle()?;

    info!(
        bind = %config.bind,
        database = %config.database_path,
        production = config.production,
        "Starting TaskHub backend"
    );

    let state = AppState::open(&config, &throttle)?;

    let missing = state.verify_scopes();
    if !missing.is_empty() {
        warn!(
            missing = ?missing,
            "Requests on routes using these scopes will be rejected until the throttle config defines them"
        );
    }

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        state
            .auth
            .user_store
            .ensure_admin(email, password)
            .context("Failed to create bootstrap admin")?;
    }

    tokio::spawn(run_maintenance(state.clone(), config.maintenance_interval()));

    let app = create_router(state, cors_layer(&config.allowed_origins()));

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Purge elapsed throttle windows and expired refresh tokens.
async fn run_maintenance(state: AppState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // First tick fires immediately; nothing has expired yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match state.gate.purge_expired().await {
            Ok(purged) => debug!(purged, "Purged expired throttle windows"),
            Err(e) => error!("Throttle window purge failed: {:#}", e),
        }

        match state.auth.tokens.purge_expired(Utc::now().timestamp()).await {
            Ok(purged) => debug!(purged, "Purged expired refresh tokens"),
            Err(e) => error!("Refresh token purge failed: {:#}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskhub_backend=debug,taskhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also try the crate root when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
