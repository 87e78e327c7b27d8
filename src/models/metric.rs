//! # Metric Model
//!
//! Append-only time series of timed measurements tagged by run, period,
//! country and user. Rows are never updated or deleted by this crate.

use crate::error::PayrollError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ProcessingTime,
    CalculationTime,
    TimesheetFetch,
    LeaveFetch,
    PayslipStorage,
    PdfGeneration,
    NotificationSend,
    ApiResponseTime,
    DatabaseQueryTime,
}

impl MetricType {
    pub const ALL: [MetricType; 9] = [
        Self::ProcessingTime,
        Self::CalculationTime,
        Self::TimesheetFetch,
        Self::LeaveFetch,
        Self::PayslipStorage,
        Self::PdfGeneration,
        Self::NotificationSend,
        Self::ApiResponseTime,
        Self::DatabaseQueryTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessingTime => "processing_time",
            Self::CalculationTime => "calculation_time",
            Self::TimesheetFetch => "timesheet_fetch",
            Self::LeaveFetch => "leave_fetch",
            Self::PayslipStorage => "payslip_storage",
            Self::PdfGeneration => "pdf_generation",
            Self::NotificationSend => "notification_send",
            Self::ApiResponseTime => "api_response_time",
            Self::DatabaseQueryTime => "database_query_time",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric_type| metric_type.as_str() == s)
            .ok_or_else(|| format!("Invalid metric type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricUnit {
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "percent")]
    Percent,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Count => "count",
            Self::Percent => "percent",
        }
    }
}

impl std::str::FromStr for MetricUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ms" => Ok(Self::Milliseconds),
            "count" => Ok(Self::Count),
            "percent" => Ok(Self::Percent),
            _ => Err(format!("Invalid metric unit: {s}")),
        }
    }
}

/// Stage-specific structured payload attached to a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricPayload {
    /// Collaborator fetch (timesheets, leave)
    Fetch { record_count: usize },
    /// Average over the employees that were successfully timed
    EmployeeAverage { employee_count: usize },
    /// Best-effort notification fan-out
    Notification { attempted: usize, sent: usize },
    /// Whole-run throughput rollup
    Processing {
        total_employees_processed: u32,
        employees_failed: u32,
        average_time_per_employee_ms: f64,
    },
    /// Caller-defined extension fields
    Custom { fields: Map<String, Value> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub metric_type: MetricType,
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub period_id: Option<i64>,
    pub run_id: Option<i64>,
    pub user_id: Option<i64>,
    pub country_id: Option<i64>,
    pub additional_data: Option<MetricPayload>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMetric {
    pub metric_type: MetricType,
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub period_id: Option<i64>,
    pub run_id: Option<i64>,
    pub user_id: Option<i64>,
    pub country_id: Option<i64>,
    pub additional_data: Option<MetricPayload>,
    /// Defaults to insertion time when absent
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewMetric {
    pub fn new(metric_type: MetricType, name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            metric_type,
            name: name.into(),
            value,
            unit,
            period_id: None,
            run_id: None,
            user_id: None,
            country_id: None,
            additional_data: None,
            recorded_at: None,
        }
    }

    /// Elapsed-time metric in milliseconds
    pub fn timing(metric_type: MetricType, name: impl Into<String>, elapsed_ms: f64) -> Self {
        Self::new(metric_type, name, elapsed_ms, MetricUnit::Milliseconds)
    }

    pub fn for_run(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn for_period(mut self, period_id: i64) -> Self {
        self.period_id = Some(period_id);
        self
    }

    pub fn for_country(mut self, country_id: i64) -> Self {
        self.country_id = Some(country_id);
        self
    }

    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: MetricPayload) -> Self {
        self.additional_data = Some(payload);
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

/// Filter for metric queries; results are newest-first and capped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub metric_type: Option<MetricType>,
    pub period_id: Option<i64>,
    pub run_id: Option<i64>,
    pub country_id: Option<i64>,
    pub user_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
        self
    }

    pub fn for_period(mut self, period_id: i64) -> Self {
        self.period_id = Some(period_id);
        self
    }

    pub fn for_run(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn for_country(mut self, country_id: i64) -> Self {
        self.country_id = Some(country_id);
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `metric` satisfies every filter except the limit
    pub fn matches(&self, metric: &Metric) -> bool {
        self.metric_type.map_or(true, |t| metric.metric_type == t)
            && self.period_id.map_or(true, |id| metric.period_id == Some(id))
            && self.run_id.map_or(true, |id| metric.run_id == Some(id))
            && self.country_id.map_or(true, |id| metric.country_id == Some(id))
            && self.user_id.map_or(true, |id| metric.user_id == Some(id))
            && self.from.map_or(true, |from| metric.recorded_at >= from)
            && self.to.map_or(true, |to| metric.recorded_at <= to)
    }
}

/// Raw `payroll_metrics` row
#[derive(Debug, Clone, FromRow)]
pub struct MetricRow {
    pub id: i64,
    pub metric_type: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub period_id: Option<i64>,
    pub run_id: Option<i64>,
    pub user_id: Option<i64>,
    pub country_id: Option<i64>,
    pub additional_data: Option<Json<MetricPayload>>,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<MetricRow> for Metric {
    type Error = PayrollError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        Ok(Metric {
            id: row.id,
            metric_type: row.metric_type.parse().map_err(PayrollError::Database)?,
            name: row.name,
            value: row.value,
            unit: row.unit.parse().map_err(PayrollError::Database)?,
            period_id: row.period_id,
            run_id: row.run_id,
            user_id: row.user_id,
            country_id: row.country_id,
            additional_data: row.additional_data.map(|payload| payload.0),
            recorded_at: row.recorded_at,
        })
    }
}
