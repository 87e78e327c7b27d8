//! # Bulk Operations
//!
//! Multi-period wrappers over the orchestrator and the period store. Each
//! period is handled independently: a failure is recorded on that item and
//! the batch carries on.

use super::run_orchestrator::PayrollOrchestrator;
use super::types::{BulkItemResult, BulkOperationResult, ValidationReport};
use crate::constants::{audit_actions, entity_types};
use crate::error::{PayrollError, Result};
use crate::logging::{log_bulk_operation, log_period_operation};
use crate::models::{AuditEntry, EmploymentFilter, PayrollPeriod};
use crate::state_machine::{PeriodEvent, PeriodStateMachine, PeriodStatus, RunStatus};
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct BulkOperations {
    orchestrator: Arc<PayrollOrchestrator>,
}

impl BulkOperations {
    pub fn new(orchestrator: Arc<PayrollOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Start a run for every period; one audit entry covers the batch
    #[instrument(skip(self, employee_ids))]
    pub async fn bulk_process(
        &self,
        period_ids: &[i64],
        employee_ids: Option<Vec<i64>>,
        actor_id: i64,
    ) -> BulkOperationResult {
        let mut results = Vec::with_capacity(period_ids.len());

        for &period_id in period_ids {
            let item = match self
                .orchestrator
                .start(period_id, employee_ids.clone(), actor_id)
                .await
            {
                Ok(started) => BulkItemResult {
                    run_id: Some(started.run_id),
                    employee_count: Some(started.employee_count),
                    ..BulkItemResult::succeeded(period_id).with_status(PeriodStatus::Processing)
                },
                Err(e) => BulkItemResult::failed(period_id, vec![e.to_string()]),
            };
            results.push(item);
        }

        let result = BulkOperationResult::from_results(results);
        let ctx = self.orchestrator.context();
        ctx.audit(
            AuditEntry::new(actor_id, audit_actions::BULK_PROCESS, entity_types::PAYROLL_PERIOD)
                .details(json!({
                    "period_ids": period_ids,
                    "total_requested": result.total_requested,
                    "success_count": result.success_count,
                    "failure_count": result.failure_count,
                })),
        )
        .await;
        log_bulk_operation(
            "bulk_process",
            result.total_requested,
            result.success_count,
            result.failure_count,
        );

        result
    }

    /// Close every period. Without `force_close` a period only closes when its
    /// latest run finished (completed or failed) with no failed employees.
    #[instrument(skip(self))]
    pub async fn bulk_close(
        &self,
        period_ids: &[i64],
        force_close: bool,
        actor_id: i64,
    ) -> BulkOperationResult {
        let mut results = Vec::with_capacity(period_ids.len());

        for &period_id in period_ids {
            let item = match self.close_one(period_id, force_close, actor_id).await {
                Ok(period) => BulkItemResult::succeeded(period_id).with_status(period.status),
                Err(CloseRejection::Unmet(reasons)) => BulkItemResult::failed(period_id, reasons),
                Err(CloseRejection::Error(e)) => BulkItemResult::failed(period_id, vec![e.to_string()]),
            };
            results.push(item);
        }

        let result = BulkOperationResult::from_results(results);
        log_bulk_operation(
            "bulk_close",
            result.total_requested,
            result.success_count,
            result.failure_count,
        );
        result
    }

    async fn close_one(
        &self,
        period_id: i64,
        force_close: bool,
        actor_id: i64,
    ) -> std::result::Result<PayrollPeriod, CloseRejection> {
        let ctx = self.orchestrator.context();
        let _guard = self.orchestrator.period_locks().acquire(period_id).await;
        let period = ctx.periods().get(period_id).await?;

        if period.status == PeriodStatus::Closed {
            return Err(CloseRejection::Unmet(vec![format!(
                "period {period_id} is already closed"
            )]));
        }

        if !force_close {
            let reasons = self.closure_blockers(period_id).await?;
            if !reasons.is_empty() {
                debug!(period_id, ?reasons, "Closure preconditions unmet");
                return Err(CloseRejection::Unmet(reasons));
            }
        }

        // Written against the status the checks saw, not every closable one
        let target = PeriodStateMachine::target_state(period.status, PeriodEvent::Close)?;
        let closed = ctx
            .periods()
            .compare_and_set_status(period_id, &[period.status], target)
            .await?;

        ctx.audit(
            AuditEntry::new(actor_id, audit_actions::PERIOD_CLOSED, entity_types::PAYROLL_PERIOD)
                .entity(period_id)
                .details(json!({
                    "previous_status": period.status,
                    "force_close": force_close,
                })),
        )
        .await;
        log_period_operation(
            "close",
            period_id,
            Some(period.status.as_str()),
            closed.status.as_str(),
            Some(actor_id),
        );

        Ok(closed)
    }

    /// Reasons the period's latest run does not allow a regular close
    async fn closure_blockers(&self, period_id: i64) -> Result<Vec<String>> {
        let latest = self
            .orchestrator
            .context()
            .runs()
            .latest_for_period(period_id)
            .await?;

        let mut reasons = Vec::new();
        match latest {
            None => reasons.push(format!("period {period_id} has never been processed")),
            Some(run) => {
                if !matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
                    reasons.push(format!("latest run {} is {}", run.id, run.status));
                }
                if run.employees_failed > 0 {
                    reasons.push(format!(
                        "latest run {} has {} failed employees",
                        run.id, run.employees_failed
                    ));
                }
            }
        }
        Ok(reasons)
    }

    /// Open every period currently in `draft` or `closed`
    #[instrument(skip(self))]
    pub async fn bulk_open(&self, period_ids: &[i64], actor_id: i64) -> BulkOperationResult {
        let ctx = self.orchestrator.context();
        let mut results = Vec::with_capacity(period_ids.len());

        for &period_id in period_ids {
            let guard = self.orchestrator.period_locks().acquire(period_id).await;
            let opened = ctx.periods().apply_event(period_id, PeriodEvent::Open).await;
            drop(guard);

            let item = match opened {
                Ok(period) => {
                    ctx.audit(
                        AuditEntry::new(
                            actor_id,
                            audit_actions::PERIOD_OPENED,
                            entity_types::PAYROLL_PERIOD,
                        )
                        .entity(period_id),
                    )
                    .await;
                    log_period_operation("open", period_id, None, period.status.as_str(), Some(actor_id));
                    BulkItemResult::succeeded(period_id).with_status(period.status)
                }
                Err(e) => BulkItemResult::failed(period_id, vec![e.to_string()]),
            };
            results.push(item);
        }

        let result = BulkOperationResult::from_results(results);
        log_bulk_operation(
            "bulk_open",
            result.total_requested,
            result.success_count,
            result.failure_count,
        );
        result
    }

    /// Read-only readiness report per period
    pub async fn validate(&self, period_ids: &[i64]) -> Vec<ValidationReport> {
        let today = Utc::now().date_naive();
        let mut reports = Vec::with_capacity(period_ids.len());
        for &period_id in period_ids {
            reports.push(self.validate_one(period_id, today).await);
        }
        reports
    }

    async fn validate_one(&self, period_id: i64, today: NaiveDate) -> ValidationReport {
        let ctx = self.orchestrator.context();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut estimated_employee_count = 0;

        match ctx.periods().get(period_id).await {
            Err(e) => errors.push(e.to_string()),
            Ok(period) => {
                if period.status != PeriodStatus::Open {
                    errors.push(format!(
                        "period status is {}, expected {}",
                        period.status,
                        PeriodStatus::Open
                    ));
                }

                match ctx.runs().active_for_period(period_id).await {
                    Ok(Some(run)) => errors.push(format!("run {} is already {}", run.id, run.status)),
                    Ok(None) => {}
                    Err(e) => errors.push(format!("could not check active runs: {e}")),
                }

                match ctx
                    .collaborators
                    .employment
                    .list_active(EmploymentFilter::active_in_country(period.country_id))
                    .await
                {
                    Ok(records) => {
                        estimated_employee_count =
                            records.iter().filter(|record| record.active).count();
                        if estimated_employee_count == 0 {
                            warnings.push("no active employees found for the period's country".to_string());
                        }
                    }
                    Err(e) => warnings.push(format!("could not estimate employee count: {e:#}")),
                }

                if period.ends_after(today) {
                    warnings.push(format!("period ends in the future ({})", period.end_date));
                }
            }
        }

        let is_valid = errors.is_empty();
        ValidationReport {
            period_id,
            is_valid,
            can_process: is_valid && estimated_employee_count > 0,
            errors,
            warnings,
            estimated_employee_count,
        }
    }
}

enum CloseRejection {
    Unmet(Vec<String>),
    Error(PayrollError),
}

impl From<PayrollError> for CloseRejection {
    fn from(error: PayrollError) -> Self {
        Self::Error(error)
    }
}
