// Error taxonomy for the connection pool, readiness gate and shell launch

use std::time::Duration;
use thiserror::Error;

/// SQLSTATE reported when the target database does not exist
pub const SQLSTATE_INVALID_CATALOG: &str = "3D000";

/// SQLSTATE reported when password authentication fails
pub const SQLSTATE_INVALID_PASSWORD: &str = "28P01";

/// Database and pool errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A physical connection could not be established or checked out
    #[error("Database connection failed: {source}")]
    Connect {
        #[source]
        source: sqlx::Error,
        hint: Option<&'static str>,
    },

    /// A statement failed after a connection was obtained
    #[error("Query execution failed for '{statement}': {source}")]
    Query {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// The pool itself can no longer serve connections
    #[error("Connection pool is no longer usable: {0}")]
    PoolFatal(String),

    #[error("Invalid database configuration: {0}")]
    Config(String),

    #[error("Scoped connection {0} was already released")]
    Released(uuid::Uuid),
}

impl DatabaseError {
    /// Classify an error raised while checking a connection out of the pool
    pub fn from_acquire(err: sqlx::Error) -> Self {
        if is_fatal_sqlx(&err) {
            return DatabaseError::PoolFatal(err.to_string());
        }

        let hint = sqlstate(&err).as_deref().and_then(connect_hint);
        DatabaseError::Connect { source: err, hint }
    }

    /// Classify an error raised by a statement on an already checked-out connection
    pub fn from_query(statement: &str, err: sqlx::Error) -> Self {
        if is_fatal_sqlx(&err) {
            return DatabaseError::PoolFatal(err.to_string());
        }

        DatabaseError::Query {
            statement: statement.to_string(),
            source: err,
        }
    }

    /// Whether the owning process must shut down
    pub fn is_fatal(&self) -> bool {
        matches!(self, DatabaseError::PoolFatal(_))
    }

    /// Operator hint for well-known connection failures
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DatabaseError::Connect { hint, .. } => *hint,
            _ => None,
        }
    }

    /// SQLSTATE of the underlying driver error, if the server reported one
    pub fn code(&self) -> Option<String> {
        match self {
            DatabaseError::Connect { source, .. } | DatabaseError::Query { source, .. } => {
                sqlstate(source)
            }
            _ => None,
        }
    }
}

/// Errors that mean the pool is closed or its background worker died
pub fn is_fatal_sqlx(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed)
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.into_owned())
}

/// Map a SQLSTATE to a short troubleshooting hint
pub fn connect_hint(code: &str) -> Option<&'static str> {
    match code {
        SQLSTATE_INVALID_CATALOG => {
            Some("database does not exist; run create-database or check DB_NAME")
        }
        SQLSTATE_INVALID_PASSWORD => {
            Some("authentication failed; check DB_USER and DB_PASSWORD")
        }
        _ => None,
    }
}

/// Readiness gate errors
#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("Timed out after {}s waiting for: {}", elapsed.as_secs(), pending.join(", "))]
    TimedOut {
        elapsed: Duration,
        pending: Vec<String>,
    },

    #[error("Failed to build HTTP probe client: {0}")]
    ProbeClient(String),
}

/// Shell process launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for shell process: {0}")]
    Wait(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_is_fatal() {
        let err = DatabaseError::from_query("SELECT 1", sqlx::Error::PoolClosed);
        assert!(err.is_fatal());

        let err = DatabaseError::from_acquire(sqlx::Error::WorkerCrashed);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_acquire_timeout_is_connect_error() {
        let err = DatabaseError::from_acquire(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DatabaseError::Connect { .. }));
        assert!(!err.is_fatal());
        assert!(err.hint().is_none());
    }

    #[test]
    fn test_query_error_keeps_statement_and_source() {
        let err = DatabaseError::from_query("SELECT * FROM holdings", sqlx::Error::RowNotFound);
        assert!(err.to_string().contains("SELECT * FROM holdings"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_connect_hints() {
        assert!(connect_hint("3D000").unwrap().contains("create-database"));
        assert!(connect_hint("28P01").unwrap().contains("DB_PASSWORD"));
        assert!(connect_hint("42P01").is_none());
    }

    #[test]
    fn test_readiness_timeout_lists_pending_endpoints() {
        let err = ReadinessError::TimedOut {
            elapsed: Duration::from_secs(60),
            pending: vec!["frontend".to_string(), "backend".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("60s"));
        assert!(message.contains("frontend, backend"));
    }
}
