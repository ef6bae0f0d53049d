// Bootstrap utilities shared by the backend and launcher binaries

use crate::config::{self, LauncherConfig, ObservabilityConfig, Settings};
use crate::db::DbPool;
use crate::telemetry;
use anyhow::{Context, Result};
use tracing::info;

/// Load `.env`, read backend settings and start logging
///
/// # Errors
/// Returns error if the environment holds invalid settings
pub fn init_backend_settings() -> Result<Settings> {
    let dotenv_path = config::load_dotenv();

    let settings = Settings::load().context("Failed to load configuration")?;
    telemetry::init_logging(&settings.observability)?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        env_file = ?dotenv_path,
        host = %settings.server.host,
        port = settings.server.port,
        database = ?settings.database.redacted(),
        "Configuration loaded"
    );
    Ok(settings)
}

/// Load `.env`, read launcher settings and start logging
pub fn init_launcher_settings() -> Result<LauncherConfig> {
    config::load_dotenv();

    let observability = ObservabilityConfig::from_env().context("Failed to load log settings")?;
    telemetry::init_logging(&observability)?;

    let launcher = LauncherConfig::from_env().context("Failed to load launcher settings")?;
    launcher
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid launcher configuration: {}", e))?;

    info!(
        frontend_url = %launcher.frontend_url,
        backend_url = %launcher.backend_url,
        max_wait_seconds = launcher.max_wait_seconds,
        "Launcher configuration loaded"
    );
    Ok(launcher)
}

/// Initialize the process-wide database pool and run one liveness check
///
/// A failed liveness check is logged and does not stop startup; the health
/// endpoint keeps reporting the database state.
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    telemetry::describe_pool_metrics();
    let db_pool = DbPool::new(&settings.database).context("Failed to initialize database pool")?;

    if !db_pool.test_connection().await {
        tracing::warn!("Database is not reachable yet; continuing startup");
    }

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
