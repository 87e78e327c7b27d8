//! # Processing Run Model
//!
//! One execution attempt of the payroll pipeline for a period. Runs are
//! append-created: a retry always creates a new run and never reuses one.
//!
//! ## Database Schema
//!
//! Maps to `processing_runs`:
//! - `status`: `started | in_progress | completed | failed | cancelled` (TEXT)
//! - `metadata`: JSONB holding [`RunMetadata`]
//! - `error_details`: JSONB holding [`ErrorDetails`]
//!
//! A partial unique index on `period_id WHERE status IN ('started','in_progress')`
//! guarantees at most one active run per period.

use crate::error::PayrollError;
use crate::state_machine::{RunEvent, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub id: i64,
    pub country_id: i64,
    pub period_id: Option<i64>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Employees attempted so far, successful or not
    pub employees_processed: i32,
    /// Subset of `employees_processed` that failed
    pub employees_failed: i32,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
    pub metadata: RunMetadata,
    pub started_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRun {
    pub fn success_employees(&self) -> i32 {
        (self.employees_processed - self.employees_failed).max(0)
    }

    pub fn total_employees(&self) -> u32 {
        self.metadata.total_employees
    }

    pub fn failed_employee_ids(&self) -> Vec<i64> {
        self.metadata
            .failed_employees
            .iter()
            .map(|failure| failure.user_id)
            .collect()
    }
}

/// Fields supplied when a run is created; status always starts at `started`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessingRun {
    pub country_id: i64,
    pub period_id: Option<i64>,
    pub started_by: Option<i64>,
    pub metadata: RunMetadata,
}

/// Typed run metadata. Unknown keys survive round trips through `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub total_employees: u32,
    #[serde(default)]
    pub employee_ids: Vec<i64>,
    #[serde(default)]
    pub failed_employees: Vec<EmployeeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of_run_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<RunTimings>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl RunMetadata {
    pub fn for_employees(employee_ids: Vec<i64>) -> Self {
        Self {
            total_employees: employee_ids.len() as u32,
            employee_ids,
            ..Self::default()
        }
    }

    pub fn with_retry_of(mut self, run_id: i64) -> Self {
        self.retry_of_run_id = Some(run_id);
        self
    }
}

/// Per-employee pipeline sub-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStage {
    Calculation,
    PayslipStorage,
    PdfGeneration,
}

/// A caught per-employee failure; recorded, never propagated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeFailure {
    pub user_id: i64,
    pub stage: EmployeeStage,
    pub error: String,
}

/// Elapsed-time rollup written when the pipeline finalizes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTimings {
    pub timesheet_fetch_ms: f64,
    pub leave_fetch_ms: f64,
    pub employee_processing_ms: f64,
    pub notification_ms: f64,
    pub total_ms: f64,
    pub average_per_employee_ms: f64,
}

/// Named pipeline phase, used to locate infrastructure failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Initialization,
    TimesheetFetch,
    LeaveFetch,
    EmployeeProcessing,
    MetricsRollup,
    Notification,
    Finalization,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::TimesheetFetch => "timesheet_fetch",
            Self::LeaveFetch => "leave_fetch",
            Self::EmployeeProcessing => "employee_processing",
            Self::MetricsRollup => "metrics_rollup",
            Self::Notification => "notification",
            Self::Finalization => "finalization",
        }
    }
}

/// Structured error details recorded on a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error classification, e.g. `database`, `collaborator`, `panic`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    pub message: String,
}

impl ErrorDetails {
    pub fn from_error(error: &PayrollError, stage: Option<PipelineStage>) -> Self {
        Self {
            kind: error.label().to_string(),
            stage,
            message: error.to_string(),
        }
    }

    pub fn panic(message: impl Into<String>, stage: Option<PipelineStage>) -> Self {
        Self {
            kind: "panic".to_string(),
            stage,
            message: message.into(),
        }
    }
}

/// A status change plus the fields it writes, applied as one compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub struct RunTransition {
    pub event: RunEvent,
    pub employees_processed: Option<i32>,
    pub employees_failed: Option<i32>,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
    pub metadata: Option<RunMetadata>,
}

impl RunTransition {
    fn bare(event: RunEvent) -> Self {
        Self {
            event,
            employees_processed: None,
            employees_failed: None,
            error_message: None,
            error_details: None,
            metadata: None,
        }
    }

    pub fn begin() -> Self {
        Self::bare(RunEvent::Begin)
    }

    pub fn cancel() -> Self {
        Self::bare(RunEvent::Cancel)
    }

    pub fn complete(processed: i32, failed: i32, metadata: Option<RunMetadata>) -> Self {
        Self {
            employees_processed: Some(processed),
            employees_failed: Some(failed),
            metadata,
            ..Self::bare(RunEvent::Complete)
        }
    }

    pub fn fail(message: impl Into<String>, details: Option<ErrorDetails>) -> Self {
        Self {
            error_message: Some(message.into()),
            error_details: details,
            ..Self::bare(RunEvent::Fail)
        }
    }

    /// Whether this transition stamps `completed_at`
    pub fn finishes_run(&self) -> bool {
        !matches!(self.event, RunEvent::Begin)
    }
}

/// Generic non-status update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub metadata: Option<RunMetadata>,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
}

/// Per-country rollup of run outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RunStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub in_progress: i64,
}

/// Run counts inside a time window, for success-rate computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RunWindowCounts {
    pub total: i64,
    pub completed: i64,
}

/// Raw `processing_runs` row
#[derive(Debug, Clone, FromRow)]
pub struct ProcessingRunRow {
    pub id: i64,
    pub country_id: i64,
    pub period_id: Option<i64>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub employees_processed: i32,
    pub employees_failed: i32,
    pub error_message: Option<String>,
    pub error_details: Option<Json<ErrorDetails>>,
    pub metadata: Json<RunMetadata>,
    pub started_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProcessingRunRow> for ProcessingRun {
    type Error = PayrollError;

    fn try_from(row: ProcessingRunRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(PayrollError::Database)?;
        Ok(ProcessingRun {
            id: row.id,
            country_id: row.country_id,
            period_id: row.period_id,
            status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            employees_processed: row.employees_processed,
            employees_failed: row.employees_failed,
            error_message: row.error_message,
            error_details: row.error_details.map(|details| details.0),
            metadata: row.metadata.0,
            started_by: row.started_by,
            updated_at: row.updated_at,
        })
    }
}
