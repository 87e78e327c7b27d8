//! PostgreSQL repositories backed by `sqlx`.
//!
//! Queries are runtime-checked (`query_as::<_, Row>`) so the crate builds
//! without a live database; row structs are converted into domain models via
//! `TryFrom`, which is where text status columns get validated.

mod metric_repository;
mod period_repository;
mod run_log_repository;

pub use metric_repository::PgMetricRepository;
pub use period_repository::PgPeriodRepository;
pub use run_log_repository::PgRunLogRepository;

/// Name of the partial unique index guarding one active run per period
pub const ACTIVE_RUN_INDEX: &str = "processing_runs_one_active_per_period";

fn status_list<T: ToString>(statuses: &[T]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}
