use anyhow::{Context, Result};
use std::process::ExitCode;

use common::config::{self, DatabaseConfig, ObservabilityConfig};
use common::db::provision::{self, ProvisionOutcome, MAINTENANCE_DATABASE};
use common::errors::{DatabaseError, SQLSTATE_INVALID_CATALOG};
use common::telemetry;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    config::load_dotenv();
    let observability = ObservabilityConfig::from_env().context("Failed to load log settings")?;
    telemetry::init_logging(&observability)?;

    let database = DatabaseConfig::from_env().context("Failed to load database settings")?;
    database
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid database configuration: {}", e))?;

    match provision::ensure_database(&database).await {
        Ok(ProvisionOutcome::AlreadyExists) => {
            println!("Database '{}' already exists", database.database);
            Ok(ExitCode::SUCCESS)
        }
        Ok(ProvisionOutcome::Created { verified_at }) => {
            println!("Database '{}' created successfully", database.database);
            if let Some(now) = verified_at {
                println!("Connection verified at {}", now);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, code = ?e.code(), "Failed to provision database");
            eprintln!("Error: {}", e);
            if let Some(hint) = provisioning_hint(&e) {
                eprintln!("Hint: {}", hint);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// The maintenance database missing means the server itself is not set up
fn provisioning_hint(err: &DatabaseError) -> Option<String> {
    match err.code().as_deref() {
        Some(SQLSTATE_INVALID_CATALOG) => Some(format!(
            "maintenance database '{}' not found; make sure PostgreSQL is running and accessible",
            MAINTENANCE_DATABASE
        )),
        _ => err.hint().map(str::to_string),
    }
}
