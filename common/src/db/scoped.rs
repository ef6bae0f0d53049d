// Scoped connection checkout with advisory leak detection

use crate::db::pool::FatalSignal;
use crate::db::statement::{self, RowSet, SqlParam};
use crate::errors::DatabaseError;
use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Most recent statement issued on a checked-out connection
#[derive(Debug, Clone, PartialEq)]
pub struct LastQuery {
    pub statement: String,
    pub params: Vec<SqlParam>,
}

impl fmt::Display for LastQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            return write!(f, "{}", self.statement);
        }

        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "{} [{}]", self.statement, params.join(", "))
    }
}

/// A connection held past the leak threshold
#[derive(Debug, Clone)]
pub struct LeakReport {
    pub checkout_id: Uuid,
    pub checked_out_at: DateTime<Utc>,
    pub held_for: Duration,
    pub threshold: Duration,
    pub last_query: Option<LastQuery>,
}

/// Receives leak warnings; never reclaims the connection
pub trait LeakReporter: Send + Sync {
    fn report(&self, report: &LeakReport);
}

/// Logs leak warnings at ERROR level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLeakReporter;

impl LeakReporter for LogLeakReporter {
    fn report(&self, report: &LeakReport) {
        counter!("db_pool_leak_warnings_total").increment(1);

        let last_query = report
            .last_query
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(none)".to_string());

        tracing::error!(
            checkout_id = %report.checkout_id,
            checked_out_at = %report.checked_out_at,
            held_ms = report.held_for.as_millis() as u64,
            threshold_ms = report.threshold.as_millis() as u64,
            last_query = %last_query,
            "A connection has been checked out for more than {}s",
            report.threshold.as_secs()
        );
    }
}

/// Leak detection settings shared by every checkout from one pool
#[derive(Clone)]
pub struct LeakDetection {
    pub threshold: Duration,
    pub reporter: Arc<dyn LeakReporter>,
}

impl LeakDetection {
    pub fn new(threshold: Duration, reporter: Arc<dyn LeakReporter>) -> Self {
        Self {
            threshold,
            reporter,
        }
    }
}

impl fmt::Debug for LeakDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakDetection")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Exclusive borrow of one pooled connection
///
/// The connection goes back to the pool on the first `release()` or on drop,
/// whichever comes first. While held, a one-shot timer reports a leak if the
/// borrow outlives the configured threshold.
pub struct ScopedConnection<C = PoolConnection<Postgres>> {
    conn: Option<C>,
    checkout_id: Uuid,
    checked_out_at: DateTime<Utc>,
    started: Instant,
    last_query: Arc<Mutex<Option<LastQuery>>>,
    leak_timer: Option<JoinHandle<()>>,
    outstanding: Arc<AtomicUsize>,
    fatal: Option<FatalSignal>,
}

impl<C> ScopedConnection<C> {
    /// Take ownership of a checked-out connection and arm the leak timer
    ///
    /// `outstanding` is incremented here and decremented on release.
    pub fn new(conn: C, leak_detection: &LeakDetection, outstanding: Arc<AtomicUsize>) -> Self {
        let checkout_id = Uuid::new_v4();
        let checked_out_at = Utc::now();
        let started = Instant::now();
        let last_query = Arc::new(Mutex::new(None));

        outstanding.fetch_add(1, Ordering::SeqCst);

        let leak_timer = tokio::spawn(watch_for_leak(
            checkout_id,
            checked_out_at,
            started,
            leak_detection.clone(),
            Arc::clone(&last_query),
        ));

        tracing::debug!(checkout_id = %checkout_id, "Connection checked out");

        Self {
            conn: Some(conn),
            checkout_id,
            checked_out_at,
            started,
            last_query,
            leak_timer: Some(leak_timer),
            outstanding,
            fatal: None,
        }
    }

    /// Publish pool-fatal errors raised on this connection through `signal`
    pub fn with_fatal_signal(mut self, signal: FatalSignal) -> Self {
        self.fatal = Some(signal);
        self
    }

    pub fn checkout_id(&self) -> Uuid {
        self.checkout_id
    }

    pub fn checked_out_at(&self) -> DateTime<Utc> {
        self.checked_out_at
    }

    pub fn held_for(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    pub fn last_query(&self) -> Option<LastQuery> {
        lock(&self.last_query).clone()
    }

    /// Remember `statement` as the last one issued on this connection
    pub fn track_query(&self, statement: &str, params: &[SqlParam]) {
        *lock(&self.last_query) = Some(LastQuery {
            statement: statement.to_string(),
            params: params.to_vec(),
        });
    }

    /// Record `statement` as in flight, unless the handle was already released
    fn begin_query(&self, statement: &str, params: &[SqlParam]) -> Result<(), DatabaseError> {
        if self.is_released() {
            return Err(DatabaseError::Released(self.checkout_id));
        }
        self.track_query(statement, params);
        Ok(())
    }

    /// Cancel the leak timer and hand the connection back to the pool
    ///
    /// Returns `true` only for the call that actually returned the connection.
    pub fn release(&mut self) -> bool {
        if let Some(timer) = self.leak_timer.take() {
            timer.abort();
        }

        match self.conn.take() {
            Some(conn) => {
                drop(conn);
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                tracing::debug!(
                    checkout_id = %self.checkout_id,
                    held_ms = self.held_for().as_millis() as u64,
                    "Connection released"
                );
                true
            }
            None => false,
        }
    }
}

impl ScopedConnection<PoolConnection<Postgres>> {
    /// Execute a statement on the borrowed connection
    pub async fn query(
        &mut self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<RowSet, DatabaseError> {
        self.begin_query(statement, params)?;

        let checkout_id = self.checkout_id;
        let fatal = self.fatal.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or(DatabaseError::Released(checkout_id))?;

        let result =
            statement::execute(&mut **conn, statement, params, std::time::Instant::now()).await;
        match fatal {
            Some(signal) => result.map_err(|e| signal.observe(e)),
            None => result,
        }
    }
}

impl<C> Drop for ScopedConnection<C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C> fmt::Debug for ScopedConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("checkout_id", &self.checkout_id)
            .field("checked_out_at", &self.checked_out_at)
            .field("released", &self.is_released())
            .finish()
    }
}

async fn watch_for_leak(
    checkout_id: Uuid,
    checked_out_at: DateTime<Utc>,
    started: Instant,
    leak_detection: LeakDetection,
    last_query: Arc<Mutex<Option<LastQuery>>>,
) {
    tokio::time::sleep(leak_detection.threshold).await;

    let report = LeakReport {
        checkout_id,
        checked_out_at,
        held_for: started.elapsed(),
        threshold: leak_detection.threshold,
        last_query: lock(&last_query).clone(),
    };
    leak_detection.reporter.report(&report);
}

fn lock(last_query: &Mutex<Option<LastQuery>>) -> std::sync::MutexGuard<'_, Option<LastQuery>> {
    last_query
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in connection that counts how often it was handed back
    struct FakeConnection {
        returned: Arc<AtomicUsize>,
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            self.returned.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<LeakReport>>,
    }

    impl RecordingReporter {
        fn reports(&self) -> Vec<LeakReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl LeakReporter for RecordingReporter {
        fn report(&self, report: &LeakReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn checkout(
        reporter: &Arc<RecordingReporter>,
        returned: &Arc<AtomicUsize>,
        outstanding: &Arc<AtomicUsize>,
    ) -> ScopedConnection<FakeConnection> {
        let detection = LeakDetection::new(
            Duration::from_secs(5),
            Arc::clone(reporter) as Arc<dyn LeakReporter>,
        );
        ScopedConnection::new(
            FakeConnection {
                returned: Arc::clone(returned),
            },
            &detection,
            Arc::clone(outstanding),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let mut conn = checkout(&reporter, &returned, &outstanding);
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);

        assert!(conn.release());
        assert!(!conn.release());
        assert!(!conn.release());
        drop(conn);

        assert_eq!(returned.load(Ordering::SeqCst), 1);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_after_release_keeps_last_statement() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let mut conn = checkout(&reporter, &returned, &outstanding);
        conn.begin_query("SELECT * FROM holdings", &[]).unwrap();
        conn.release();

        let err = conn
            .begin_query("DELETE FROM holdings WHERE id = $1", &[SqlParam::from(7)])
            .unwrap_err();

        assert!(matches!(err, DatabaseError::Released(id) if id == conn.checkout_id()));
        assert_eq!(
            conn.last_query().map(|q| q.statement),
            Some("SELECT * FROM holdings".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_once() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        {
            let _conn = checkout(&reporter, &returned, &outstanding);
        }

        assert_eq!(returned.load(Ordering::SeqCst), 1);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_reported_once_with_last_query() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let conn = checkout(&reporter, &returned, &outstanding);
        conn.track_query("BEGIN", &[]);
        conn.track_query(
            "UPDATE positions SET quantity = $1 WHERE symbol = $2",
            &[SqlParam::Int(10), SqlParam::from("MSFT")],
        );

        tokio::time::sleep(Duration::from_secs(6)).await;

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.checkout_id, conn.checkout_id());
        assert!(report.held_for >= Duration::from_secs(5));
        let last = report.last_query.as_ref().unwrap();
        assert_eq!(
            last.statement,
            "UPDATE positions SET quantity = $1 WHERE symbol = $2"
        );
        assert_eq!(
            last.to_string(),
            "UPDATE positions SET quantity = $1 WHERE symbol = $2 [10, 'MSFT']"
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(reporter.reports().len(), 1);

        // Advisory only: the connection is still held
        assert!(!conn.is_released());
        assert_eq!(returned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_threshold_cancels_warning() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let mut conn = checkout(&reporter, &returned, &outstanding);
        conn.track_query("SELECT 1", &[]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        conn.release();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_without_any_query() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let _conn = checkout(&reporter, &returned, &outstanding);
        tokio::time::sleep(Duration::from_secs(5) + Duration::from_millis(1)).await;

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].last_query.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_checkouts_are_tracked_independently() {
        let reporter = Arc::new(RecordingReporter::default());
        let returned = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let first = checkout(&reporter, &returned, &outstanding);
        let mut second = checkout(&reporter, &returned, &outstanding);
        assert_ne!(first.checkout_id(), second.checkout_id());
        assert_eq!(outstanding.load(Ordering::SeqCst), 2);

        first.track_query("SELECT * FROM portfolios", &[]);
        second.track_query("SELECT * FROM trades", &[]);
        second.release();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].checkout_id, first.checkout_id());
        assert_eq!(
            reports[0].last_query.as_ref().unwrap().statement,
            "SELECT * FROM portfolios"
        );
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);
    }
}
