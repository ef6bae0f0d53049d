use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use common::config::Settings;
use common::db::DbPool;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub config: Arc<Settings>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(db_pool: DbPool, config: Settings, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            db_pool,
            config: Arc::new(config),
            metrics,
        }
    }
}
