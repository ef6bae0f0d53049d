// Telemetry: structured logging setup and pool metric descriptions

use crate::config::{LogFormat, ObservabilityConfig};
use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` wins over the configured level. JSON output carries span
/// context; pretty output is meant for a developer terminal.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = env_filter(config)?;

    let layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = %config.log_level,
        log_format = ?config.log_format,
        "Logging initialized"
    );

    Ok(())
}

/// `RUST_LOG` if it is set and valid, otherwise the configured level
pub fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))
}

/// Register descriptions for the metrics the pool records
pub fn describe_pool_metrics() {
    describe_counter!("db_queries_total", "Total number of successful statements");
    describe_counter!("db_query_errors_total", "Total number of failed statements");
    describe_histogram!(
        "db_query_duration_seconds",
        Unit::Seconds,
        "Statement duration including connection checkout"
    );
    describe_counter!(
        "db_pool_leak_warnings_total",
        "Connections held past the leak threshold"
    );
    describe_gauge!("db_pool_connections", "Open connections in the pool");
    describe_gauge!("db_pool_idle_connections", "Idle connections in the pool");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_builds_filter() {
        let filter = env_filter(&ObservabilityConfig::default()).unwrap();
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(filter.to_string(), "info");
        }
    }

    #[test]
    fn test_init_logging_rejects_bad_directive_without_rust_log() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = ObservabilityConfig {
            log_level: "common=notalevel".to_string(),
            log_format: LogFormat::Json,
        };
        assert!(env_filter(&config).is_err());
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_describe_pool_metrics_without_recorder() {
        describe_pool_metrics();
    }
}
