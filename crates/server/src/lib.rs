//! CommonIO Server Library
//!
//! Real-time presence and direct messaging over WebSocket.

pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod guard;
pub mod handlers;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod validate;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::path::Path;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::prelude::*;

use config::{AppState, ServerConfig};

/// Build the HTTP router: health check, the WebSocket gateway and static files.
pub fn app(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(gateway::ws_handler))
        .fallback_service(static_files)
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Log to the console and to `<log_dir>/commonio.log`.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_tracing(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, "commonio.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "commonio_server=debug,info".into());

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init();

    guard
}

pub async fn run() -> anyhow::Result<()> {
    let log_dir = config::log_dir_from_env();
    tokio::fs::create_dir_all(&log_dir).await?;
    let _guard = init_tracing(&log_dir);

    let config = ServerConfig::default();
    config.ensure_dirs().await?;

    info!("=== CommonIO Server ===");
    info!("Database: {:?}", config.database_path());
    info!("Static files: {:?}", config.static_dir);

    let state = AppState::new(config.clone()).await?;

    sweeper::spawn(
        state.sessions.clone(),
        config.sweep_interval,
        config.session_ttl,
    );

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("CommonIO listening on http://localhost:{}", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - CommonIO Server"
}
