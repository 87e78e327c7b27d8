//! Result types returned across the orchestration boundary.

use crate::models::ProcessingRun;
use crate::state_machine::{PeriodStatus, RunStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunResult {
    pub run_id: i64,
    pub employee_count: usize,
}

/// Latest run of a period plus derived progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub period_id: i64,
    /// `None` when the period has never been processed
    pub run: Option<ProcessingRun>,
    pub success_employees: i32,
    pub total_employees: u32,
    pub progress_percent: f64,
}

impl RunStatusReport {
    pub fn for_run(period_id: i64, run: Option<ProcessingRun>) -> Self {
        match run {
            Some(run) => {
                let total = run.total_employees();
                let progress_percent = if total == 0 {
                    0.0
                } else {
                    (f64::from(run.employees_processed) / f64::from(total) * 100.0).min(100.0)
                };
                Self {
                    period_id,
                    success_employees: run.success_employees(),
                    total_employees: total,
                    progress_percent,
                    run: Some(run),
                }
            }
            None => Self {
                period_id,
                run: None,
                success_employees: 0,
                total_employees: 0,
                progress_percent: 0.0,
            },
        }
    }

    pub fn has_run(&self) -> bool {
        self.run.is_some()
    }
}

/// Broadcast when a run leaves the worker, whatever its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub run_id: i64,
    pub period_id: Option<i64>,
    pub status: RunStatus,
    pub employees_processed: i32,
    pub employees_failed: i32,
}

/// Outcome of one item in a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub period_id: i64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<usize>,
    /// Period status after the operation, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PeriodStatus>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BulkItemResult {
    pub fn succeeded(period_id: i64) -> Self {
        Self {
            period_id,
            success: true,
            run_id: None,
            employee_count: None,
            status: None,
            errors: Vec::new(),
        }
    }

    pub fn failed(period_id: i64, errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::succeeded(period_id)
        }
    }

    pub fn with_status(mut self, status: PeriodStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub total_requested: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkOperationResult {
    pub fn from_results(results: Vec<BulkItemResult>) -> Self {
        let success_count = results.iter().filter(|item| item.success).count();
        Self {
            total_requested: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
        }
    }

    pub fn item(&self, period_id: i64) -> Option<&BulkItemResult> {
        self.results.iter().find(|item| item.period_id == period_id)
    }
}

/// Read-only readiness diagnostic for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub period_id: i64,
    pub is_valid: bool,
    pub can_process: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_employee_count: usize,
}
