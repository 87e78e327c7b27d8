//! # Metrics Aggregator
//!
//! Read-side rollups over the metric series and the run log: ad-hoc
//! statistics, per-period and per-run summaries, and the cross-period system
//! dashboard.
//!
//! Dashboard sub-computations are guarded independently. A failing store read
//! degrades that part of the dashboard to zero or empty and is logged; it never
//! fails the dashboard as a whole.

use super::statistics::AggregateStatistics;
use crate::config::MetricsConfig;
use crate::error::Result;
use crate::models::{Metric, MetricPayload, MetricQuery, MetricType, ProcessingRun};
use crate::repositories::{MetricRepository, RunLogRepository};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rolling windows reported on the system dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardWindow {
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl DashboardWindow {
    pub const ALL: [DashboardWindow; 3] = [Self::LastDay, Self::LastWeek, Self::LastMonth];

    pub fn duration(&self) -> Duration {
        match self {
            Self::LastDay => Duration::hours(24),
            Self::LastWeek => Duration::days(7),
            Self::LastMonth => Duration::days(30),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::LastDay => "24h",
            Self::LastWeek => "7d",
            Self::LastMonth => "30d",
        }
    }
}

/// Health of one dashboard window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowHealth {
    pub window: DashboardWindow,
    pub average_processing_time_ms: f64,
    pub processing_samples: usize,
    pub runs_started: i64,
    pub runs_completed: i64,
    /// Percentage in `[0, 100]`; 100 when no run started in the window
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDashboard {
    pub generated_at: DateTime<Utc>,
    pub active_runs: i64,
    pub windows: Vec<WindowHealth>,
    pub api_response_time_p95: f64,
    pub database_query_time_p95: f64,
    /// Last-24h statistics for every metric type that has samples
    pub metric_aggregates: BTreeMap<MetricType, AggregateStatistics>,
}

impl SystemDashboard {
    pub fn window(&self, window: DashboardWindow) -> Option<&WindowHealth> {
        self.windows.iter().find(|health| health.window == window)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period_id: i64,
    /// Mean value per metric type across every row tagged with the period
    pub averages: BTreeMap<MetricType, f64>,
    pub sample_counts: BTreeMap<MetricType, i64>,
    pub total_employees_processed: u32,
    pub employees_failed: u32,
    pub average_time_per_employee_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: ProcessingRun,
    pub stages: BTreeMap<MetricType, AggregateStatistics>,
}

pub struct MetricsAggregator {
    metrics: Arc<dyn MetricRepository>,
    runs: Arc<dyn RunLogRepository>,
    config: MetricsConfig,
}

impl MetricsAggregator {
    pub fn new(
        metrics: Arc<dyn MetricRepository>,
        runs: Arc<dyn RunLogRepository>,
        config: MetricsConfig,
    ) -> Self {
        Self {
            metrics,
            runs,
            config,
        }
    }

    /// Effective row cap for a query; never below one row
    pub fn effective_limit(&self, query: &MetricQuery) -> usize {
        query
            .limit
            .unwrap_or(self.config.default_query_limit)
            .min(self.config.max_query_limit)
            .max(1)
    }

    /// Filtered metrics, newest first, capped
    pub async fn query(&self, query: &MetricQuery) -> Result<Vec<Metric>> {
        let limit = self.effective_limit(query);
        self.metrics.query(query, limit).await
    }

    pub async fn aggregate(
        &self,
        metric_type: MetricType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AggregateStatistics> {
        let samples = self.metrics.values(metric_type, from, to).await?;
        Ok(AggregateStatistics::from_samples(&samples))
    }

    pub async fn period_summary(&self, period_id: i64) -> Result<PeriodSummary> {
        let averages = self
            .metrics
            .averages_by_type(&MetricQuery::new().for_period(period_id))
            .await?;

        let latest_processing = self
            .metrics
            .query(
                &MetricQuery::new()
                    .for_period(period_id)
                    .of_type(MetricType::ProcessingTime),
                1,
            )
            .await?;

        let (total_employees_processed, employees_failed, average_time_per_employee_ms) =
            match latest_processing
                .first()
                .and_then(|metric| metric.additional_data.as_ref())
            {
                Some(MetricPayload::Processing {
                    total_employees_processed,
                    employees_failed,
                    average_time_per_employee_ms,
                }) => (
                    *total_employees_processed,
                    *employees_failed,
                    *average_time_per_employee_ms,
                ),
                _ => (0, 0, 0.0),
            };

        Ok(PeriodSummary {
            period_id,
            averages: averages
                .iter()
                .map(|average| (average.metric_type, average.average))
                .collect(),
            sample_counts: averages
                .iter()
                .map(|average| (average.metric_type, average.count))
                .collect(),
            total_employees_processed,
            employees_failed,
            average_time_per_employee_ms,
        })
    }

    pub async fn run_summary(&self, run_id: i64) -> Result<RunSummary> {
        let run = self.runs.get(run_id).await?;
        let metrics = self
            .metrics
            .query(&MetricQuery::new().for_run(run_id), self.config.max_query_limit)
            .await?;

        let mut samples: BTreeMap<MetricType, Vec<f64>> = BTreeMap::new();
        for metric in &metrics {
            samples
                .entry(metric.metric_type)
                .or_default()
                .push(metric.value);
        }

        Ok(RunSummary {
            run,
            stages: samples
                .into_iter()
                .map(|(metric_type, values)| {
                    (metric_type, AggregateStatistics::from_samples(&values))
                })
                .collect(),
        })
    }

    pub async fn system_dashboard(&self) -> SystemDashboard {
        self.system_dashboard_at(Utc::now()).await
    }

    /// Dashboard with windows ending at `now`
    pub async fn system_dashboard_at(&self, now: DateTime<Utc>) -> SystemDashboard {
        let active_runs = self
            .runs
            .count_active()
            .await
            .unwrap_or_else(|e| degraded("active_runs", &e, 0));

        let mut windows = Vec::with_capacity(DashboardWindow::ALL.len());
        for window in DashboardWindow::ALL {
            windows.push(self.window_health(window, now).await);
        }

        let last_day = Some(now - DashboardWindow::LastDay.duration());
        let api_response_time_p95 = self
            .aggregate(MetricType::ApiResponseTime, last_day, Some(now))
            .await
            .map(|stats| stats.p95)
            .unwrap_or_else(|e| degraded("api_response_time_p95", &e, 0.0));
        let database_query_time_p95 = self
            .aggregate(MetricType::DatabaseQueryTime, last_day, Some(now))
            .await
            .map(|stats| stats.p95)
            .unwrap_or_else(|e| degraded("database_query_time_p95", &e, 0.0));

        let mut metric_aggregates = BTreeMap::new();
        for metric_type in MetricType::ALL {
            match self.aggregate(metric_type, last_day, Some(now)).await {
                Ok(stats) if stats.count > 0 => {
                    metric_aggregates.insert(metric_type, stats);
                }
                Ok(_) => {}
                Err(e) => {
                    degraded(metric_type.as_str(), &e, ());
                }
            }
        }

        debug!(
            active_runs,
            aggregated_types = metric_aggregates.len(),
            "Built system dashboard"
        );

        SystemDashboard {
            generated_at: now,
            active_runs,
            windows,
            api_response_time_p95,
            database_query_time_p95,
            metric_aggregates,
        }
    }

    async fn window_health(&self, window: DashboardWindow, now: DateTime<Utc>) -> WindowHealth {
        let since = now - window.duration();

        let processing = self
            .aggregate(MetricType::ProcessingTime, Some(since), Some(now))
            .await
            .unwrap_or_else(|e| degraded(window.label(), &e, AggregateStatistics::default()));

        let counts = self
            .runs
            .window_counts(since, now)
            .await
            .unwrap_or_else(|e| degraded(window.label(), &e, Default::default()));

        WindowHealth {
            window,
            average_processing_time_ms: processing.average,
            processing_samples: processing.count,
            runs_started: counts.total,
            runs_completed: counts.completed,
            success_rate: success_rate(counts.completed, counts.total),
        }
    }
}

/// Completed share of runs as a percentage; vacuously 100 with no runs
pub fn success_rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 100.0;
    }
    completed as f64 / total as f64 * 100.0
}

fn degraded<T>(component: &str, error: &crate::error::PayrollError, fallback: T) -> T {
    warn!(component, error = %error, "Dashboard component degraded");
    fallback
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
