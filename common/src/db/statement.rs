// Raw statement execution with timing telemetry

use crate::errors::DatabaseError;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Either, Executor, Postgres, Row};
use std::fmt;
use std::time::{Duration, Instant};

/// Positional statement parameter (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Null => write!(f, "NULL"),
            SqlParam::Bool(v) => write!(f, "{}", v),
            SqlParam::Int(v) => write!(f, "{}", v),
            SqlParam::Float(v) => write!(f, "{}", v),
            SqlParam::Text(v) => write!(f, "'{}'", v),
            SqlParam::Json(v) => write!(f, "{}", v),
            SqlParam::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value.into())
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<serde_json::Value> for SqlParam {
    fn from(value: serde_json::Value) -> Self {
        SqlParam::Json(value)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

/// Rows returned by a statement plus its timing
#[derive(Debug)]
pub struct RowSet {
    pub rows: Vec<PgRow>,
    /// Returned rows, or affected rows for statements that return none
    pub row_count: u64,
    pub duration: Duration,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Convert the rows to JSON objects keyed by column name
    pub fn to_json(&self) -> Vec<serde_json::Value> {
        self.rows.iter().map(row_to_json).collect()
    }
}

fn row_to_json(row: &PgRow) -> serde_json::Value {
    let mut row_map = serde_json::Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value: serde_json::Value = if let Ok(v) = row.try_get::<String, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<i32, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<i64, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<bool, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<DateTime<Utc>, _>(i) {
            json!(v.to_rfc3339())
        } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(i) {
            json!(v.to_string())
        } else if let Ok(v) = row.try_get::<serde_json::Value, _>(i) {
            v
        } else {
            serde_json::Value::Null
        };

        row_map.insert(column.name().to_string(), value);
    }

    serde_json::Value::Object(row_map)
}

/// Run one statement on `executor`, log it and record its duration
///
/// `started` is taken by the caller so time spent waiting for a connection is
/// included in the reported duration.
// `fetch_many` is deprecated in sqlx 0.8 but is the only call that yields both
// rows and the affected count from a single execution.
#[allow(deprecated)]
pub(crate) async fn execute<'c, E>(
    executor: E,
    statement: &str,
    params: &[SqlParam],
    started: Instant,
) -> Result<RowSet, DatabaseError>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = bind_params(sqlx::query(statement), params);

    let mut rows = Vec::new();
    let mut rows_affected = 0u64;
    let mut stream = executor.fetch_many(query);

    let outcome: Result<(), sqlx::Error> = async {
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(row),
            }
        }
        Ok(())
    }
    .await;
    drop(stream);

    let duration = started.elapsed();

    match outcome {
        Ok(()) => {
            let row_count = if rows.is_empty() {
                rows_affected
            } else {
                rows.len() as u64
            };

            counter!("db_queries_total").increment(1);
            histogram!("db_query_duration_seconds").record(duration.as_secs_f64());
            tracing::info!(
                statement = statement,
                duration_ms = duration.as_millis() as u64,
                rows = row_count,
                "Executed query"
            );

            Ok(RowSet {
                rows,
                row_count,
                duration,
            })
        }
        Err(e) => {
            counter!("db_query_errors_total").increment(1);
            tracing::error!(
                statement = statement,
                params = ?params,
                duration_ms = duration.as_millis() as u64,
                error = %e,
                "Database query error"
            );
            Err(DatabaseError::from_query(statement, e))
        }
    }
}
