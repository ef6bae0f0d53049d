use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::sync::watch;

mod handlers;
mod routes;
mod state;

use common::bootstrap;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = bootstrap::init_backend_settings()?;

    tracing::info!("Starting backend server");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;
    tracing::info!("Metrics exporter initialized");

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let fatal = db_pool.fatal_signal();

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(db_pool.clone(), settings, Some(metrics_handle));
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Backend server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = bootstrap::shutdown_signal() => {},
                _ = wait_for_pool_fatal(fatal) => {},
            }
        })
        .await?;

    let poisoned = db_pool.is_poisoned();
    db_pool.close().await;
    tracing::info!("Database pool closed");

    if poisoned {
        anyhow::bail!("Database pool failed; backend stopped");
    }

    tracing::info!("Backend server stopped");
    Ok(())
}

/// Resolves once the pool reports an unrecoverable failure
async fn wait_for_pool_fatal(mut fatal: watch::Receiver<Option<String>>) {
    loop {
        if let Some(reason) = fatal.borrow_and_update().clone() {
            tracing::error!(reason = %reason, "Database pool failed; shutting down");
            return;
        }
        if fatal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
