//! # Metrics
//!
//! Write path ([`MetricsRecorder`]) and read path ([`MetricsAggregator`]) over
//! the append-only metric series.

pub mod aggregator;
pub mod recorder;
pub mod statistics;

pub use aggregator::{
    success_rate, DashboardWindow, MetricsAggregator, PeriodSummary, RunSummary, SystemDashboard,
    WindowHealth,
};
pub use recorder::{MetricsRecorder, StageTimer};
pub use statistics::{percentile, AggregateStatistics};
