//! # Structured Logging Module
//!
//! Environment-aware structured logging for the run pipeline. Every helper
//! emits a uniform set of fields so run and period activity can be filtered
//! by `run_id`/`period_id` in any collector.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let directive = config
            .level
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| get_log_level(&environment));

        let console = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(EnvFilter::new(&directive))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(&directive))
                .boxed()
        };

        // Embedding hosts may already own the global subscriber
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            environment = %environment,
            filter = %directive,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("PAYROLL_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for run lifecycle operations
pub fn log_run_operation(
    operation: &str,
    run_id: Option<i64>,
    period_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = run_id,
        period_id = period_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RUN_OPERATION"
    );
}

/// Log structured data for period status changes
pub fn log_period_operation(
    operation: &str,
    period_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    actor_id: Option<i64>,
) {
    tracing::info!(
        operation = %operation,
        period_id = period_id,
        from_status = from_status,
        to_status = %to_status,
        actor_id = actor_id,
        timestamp = %Utc::now().to_rfc3339(),
        "PERIOD_OPERATION"
    );
}

/// Log a summary of a bulk operation
pub fn log_bulk_operation(operation: &str, requested: usize, succeeded: usize, failed: usize) {
    tracing::info!(
        operation = %operation,
        total_requested = requested,
        success_count = succeeded,
        failure_count = failed,
        timestamp = %Utc::now().to_rfc3339(),
        "BULK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_repeated_initialization_is_harmless() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
        log_run_operation("test", Some(1), Some(2), "started", None);
    }
}
