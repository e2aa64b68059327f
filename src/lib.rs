pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod telemetry;

use axum::Router;
use db::{Database, Metadata};
use routes::AppState;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Run the backend until Ctrl+C or SIGTERM.
///
/// Builds the pool, creates the tables in `metadata`, serves `app_routes`
/// (each request inside its own session) plus `/health`, and disposes the
/// pool once the server has drained.
pub async fn run(
    config: config::Config,
    metadata: Metadata,
    app_routes: Router<AppState>,
) -> anyhow::Result<()> {
    telemetry::init_tracing(&config.rust_log, config.rust_log_format);

    let db = Database::connect(&config.database())?;
    db.initialize_schema(&metadata).await?;

    let app = routes::router(AppState { db: db.clone() }, app_routes)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    db.shutdown().await;
    served?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::warn!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
