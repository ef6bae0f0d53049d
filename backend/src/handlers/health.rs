use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
    Error,
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub database: DatabaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    fn new(database: DatabaseStatus, error: Option<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: "Backend server is running".to_string(),
            database,
            error,
        }
    }
}

/// Health check endpoint
///
/// Always answers 200; database trouble is reported in the body.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let timeout = state.config.server.health_check_timeout();

    let response = match tokio::time::timeout(timeout, state.db_pool.test_connection()).await {
        Ok(true) => HealthResponse::new(DatabaseStatus::Connected, None),
        Ok(false) => HealthResponse::new(DatabaseStatus::Disconnected, None),
        Err(_) => {
            let message = format!("Database check timed out after {}s", timeout.as_secs());
            tracing::warn!(error = %message, "Health check could not complete");
            HealthResponse::new(DatabaseStatus::Error, Some(message))
        }
    };

    (StatusCode::OK, Json(response))
}
