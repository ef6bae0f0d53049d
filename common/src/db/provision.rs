// One-shot database provisioning: create the application database if missing

use crate::config::DatabaseConfig;
use crate::db::pool::connect_options;
use crate::errors::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::{info, instrument};

/// Database every PostgreSQL server ships with
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// What `ensure_database` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyExists,
    Created { verified_at: Option<DateTime<Utc>> },
}

/// Quote an identifier for use in DDL, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create `config.database` through the maintenance database if it does not exist
///
/// After creating it, connects to the new database and runs `SELECT NOW()`.
#[instrument(skip(config), fields(database = %config.database))]
pub async fn ensure_database(config: &DatabaseConfig) -> Result<ProvisionOutcome, DatabaseError> {
    info!(config = ?config.redacted(), "Connecting to PostgreSQL maintenance database");

    let admin_options = connect_options(&config.for_database(MAINTENANCE_DATABASE));
    let mut admin = admin_options
        .connect()
        .await
        .map_err(DatabaseError::from_acquire)?;

    let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&config.database)
        .fetch_optional(&mut admin)
        .await
        .map_err(|e| DatabaseError::from_query("SELECT 1 FROM pg_database", e))?
        .is_some();

    if exists {
        info!("Database already exists");
        close_quietly(admin).await;
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    let create = format!("CREATE DATABASE {}", quote_identifier(&config.database));
    info!(statement = %create, "Creating database");
    sqlx::raw_sql(&create)
        .execute(&mut admin)
        .await
        .map_err(|e| DatabaseError::from_query(&create, e))?;
    close_quietly(admin).await;
    info!("Database created");

    let mut conn = connect_options(config)
        .connect()
        .await
        .map_err(DatabaseError::from_acquire)?;
    let verified_at: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT NOW()")
        .fetch_optional(&mut conn)
        .await
        .map_err(|e| DatabaseError::from_query("SELECT NOW()", e))?;
    close_quietly(conn).await;

    info!(verified_at = ?verified_at, "Connection to new database verified");
    Ok(ProvisionOutcome::Created { verified_at })
}

async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Error while closing provisioning connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("portfolio_analytics"), "\"portfolio_analytics\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            ..DatabaseConfig::default()
        };

        let err = ensure_database(&config).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connect { .. }));
    }
}
