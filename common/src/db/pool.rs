// PostgreSQL connection pool: instrumented queries, scoped checkout, liveness checks

use crate::config::DatabaseConfig;
use crate::db::scoped::{LeakDetection, LeakReporter, LogLeakReporter, ScopedConnection};
use crate::db::statement::{self, RowSet, SqlParam};
use crate::errors::DatabaseError;
use chrono::{DateTime, Utc};
use metrics::gauge;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Statement used by `test_connection`
const LIVENESS_STATEMENT: &str = "SELECT NOW()";

/// Build driver connection options from configuration
///
/// The password is only set when one was configured; an unset password is
/// never sent as an empty string.
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new_without_pgpass()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user);

    match config.password.as_deref() {
        Some(password) => options.password(password),
        None => options,
    }
}

/// First pool-fatal error, shared by a pool and its scoped connections
#[derive(Debug, Clone)]
pub struct FatalSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl FatalSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    pub fn is_raised(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Publish `err` to the supervisor if it is fatal; every error is passed through
    ///
    /// Only the first fatal error is kept.
    pub fn observe(&self, err: DatabaseError) -> DatabaseError {
        if err.is_fatal() {
            let message = err.to_string();
            let first = self.tx.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(message.clone());
                true
            });
            if first {
                tracing::error!(error = %message, "Connection pool entered a fatal state");
            }
        }
        err
    }
}

impl Default for FatalSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide database connection pool
///
/// Cloning is cheap; every clone shares the same connections, leak detector
/// and fatal-error signal.
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
    config: Arc<DatabaseConfig>,
    leak_detection: LeakDetection,
    checked_out: Arc<AtomicUsize>,
    fatal: FatalSignal,
}

impl DbPool {
    /// Create the pool; connections are opened lazily on first use
    ///
    /// # Errors
    /// Returns `DatabaseError::Config` if the configuration is invalid
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::with_leak_reporter(config, Arc::new(LogLeakReporter))
    }

    /// Create the pool with a custom destination for leak warnings
    pub fn with_leak_reporter(
        config: &DatabaseConfig,
        leak_reporter: Arc<dyn LeakReporter>,
    ) -> Result<Self, DatabaseError> {
        config.validate().map_err(DatabaseError::Config)?;

        info!(config = ?config.redacted(), "Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .idle_timeout(Some(config.idle_timeout()))
            .acquire_timeout(config.connect_timeout())
            .after_connect(|_conn, _meta| {
                Box::pin(async move {
                    tracing::info!("Connected to PostgreSQL database");
                    Ok(())
                })
            })
            .connect_lazy_with(connect_options(config));

        info!(
            max_connections = config.max_connections,
            idle_timeout_seconds = config.idle_timeout_seconds,
            connect_timeout_seconds = config.connect_timeout_seconds,
            leak_threshold_seconds = config.leak_threshold_seconds,
            "Database connection pool initialized"
        );

        Ok(Self {
            pool,
            config: Arc::new(config.clone()),
            leak_detection: LeakDetection::new(config.leak_threshold(), leak_reporter),
            checked_out: Arc::new(AtomicUsize::new(0)),
            fatal: FatalSignal::new(),
        })
    }

    /// Run one statement on a pooled connection and return its rows
    ///
    /// The connection is checked out for the duration of the statement only.
    #[instrument(skip(self, params), fields(statement = %statement))]
    pub async fn query(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<RowSet, DatabaseError> {
        let started = Instant::now();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| self.acquire_failed(e))?;

        let result = statement::execute(&mut *conn, statement, params, started).await;
        drop(conn);
        self.record_pool_gauges();

        result.map_err(|e| self.observe(e))
    }

    /// Check out a connection for exclusive use across several statements
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<ScopedConnection, DatabaseError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| self.acquire_failed(e))?;

        let scoped =
            ScopedConnection::new(conn, &self.leak_detection, Arc::clone(&self.checked_out))
                .with_fatal_signal(self.fatal.clone());
        self.record_pool_gauges();
        Ok(scoped)
    }

    /// Issue a trivial statement; never raises
    ///
    /// On failure the redacted connection settings are logged for diagnostics.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> bool {
        match self.query(LIVENESS_STATEMENT, &[]).await {
            Ok(rows) => {
                let now = rows
                    .rows
                    .first()
                    .and_then(|row| row.try_get::<DateTime<Utc>, _>(0).ok());
                info!(now = ?now, "Database connection test successful");
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    hint = e.hint(),
                    config = ?self.config.redacted(),
                    "Database connection test failed"
                );
                false
            }
        }
    }

    /// Receiver that yields the first pool-fatal error, if one ever occurs
    pub fn fatal_signal(&self) -> watch::Receiver<Option<String>> {
        self.fatal.subscribe()
    }

    /// Whether a pool-fatal error has been observed
    pub fn is_poisoned(&self) -> bool {
        self.fatal.is_raised()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the current number of connections in the pool
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    /// Get the number of idle connections in the pool
    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Number of scoped connections currently checked out
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    /// Close the connection pool gracefully
    ///
    /// Waits for checked-out connections to come back before returning.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    fn acquire_failed(&self, err: sqlx::Error) -> DatabaseError {
        let err = DatabaseError::from_acquire(err);
        tracing::error!(
            error = %err,
            hint = err.hint(),
            config = ?self.config.redacted(),
            "Failed to obtain database connection"
        );
        self.observe(err)
    }

    fn observe(&self, err: DatabaseError) -> DatabaseError {
        self.fatal.observe(err)
    }

    fn record_pool_gauges(&self) {
        gauge!("db_pool_connections").set(f64::from(self.pool.size()));
        gauge!("db_pool_idle_connections").set(self.pool.num_idle() as f64);
    }
}

impl fmt::Debug for DbPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbPool")
            .field("config", &self.config.redacted())
            .field("size", &self.pool.size())
            .field("checked_out", &self.checked_out())
            .finish()
    }
}
