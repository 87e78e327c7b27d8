//! # Payroll Orchestrator
//!
//! Request-side entry points for processing runs. Preconditions are checked
//! synchronously and surface as [`PayrollError`]s; once a run is created and
//! queued the caller gets its id back immediately and every later outcome is
//! only observable through the run log ([`PayrollOrchestrator::get_status`]).
//!
//! ## Exclusion
//!
//! `start` holds a per-period async mutex across validate → create → flip, and
//! the run log's `create_exclusive` rejects a second active run at the store
//! level, so two concurrent starts for one period yield exactly one run.

use super::collaborators::Collaborators;
use super::context::{OrchestrationContext, PayrollStores};
use super::period_locks::PeriodLocks;
use super::pipeline::RunJob;
use super::types::{RunCompletion, RunStatusReport, StartRunResult};
use super::worker::PipelineWorker;
use crate::config::OrchestrationConfig;
use crate::constants::{audit_actions, collaborators, entity_types};
use crate::error::{PayrollError, Result};
use crate::logging::{log_period_operation, log_run_operation};
use crate::models::{
    AuditEntry, EmploymentFilter, ErrorDetails, NewProcessingRun, PayrollPeriod, ProcessingRun,
    RunMetadata,
};
use crate::state_machine::{PeriodEvent, PeriodStatus};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Period statuses a fresh start accepts
const START_SOURCES: &[PeriodStatus] = &[PeriodStatus::Open];

/// A retry also accepts a period left in `processing` by a run with failures
const RETRY_SOURCES: &[PeriodStatus] = &[PeriodStatus::Open, PeriodStatus::Processing];

pub struct PayrollOrchestrator {
    ctx: Arc<OrchestrationContext>,
    worker: PipelineWorker,
    period_locks: PeriodLocks,
}

impl PayrollOrchestrator {
    /// Build the orchestrator and start its worker; requires a Tokio runtime
    pub fn new(
        stores: PayrollStores,
        collaborators: Collaborators,
        config: OrchestrationConfig,
    ) -> Self {
        let worker_config = config.clone();
        let ctx = Arc::new(OrchestrationContext::new(stores, collaborators, config));
        let worker = PipelineWorker::spawn(ctx.clone(), &worker_config);
        Self {
            ctx,
            worker,
            period_locks: PeriodLocks::new(),
        }
    }

    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.ctx
    }

    /// Completion events for every run that leaves the worker
    pub fn subscribe(&self) -> broadcast::Receiver<RunCompletion> {
        self.worker.subscribe()
    }

    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }

    /// Locks shared by every check-then-write on a period
    pub fn period_locks(&self) -> &PeriodLocks {
        &self.period_locks
    }

    /// Create a run for `period_id` and hand it to the worker.
    ///
    /// `employee_ids` defaults to every active employee in the period's
    /// country. An empty employee set fails without side effects.
    #[instrument(skip(self, employee_ids))]
    pub async fn start(
        &self,
        period_id: i64,
        employee_ids: Option<Vec<i64>>,
        actor_id: i64,
    ) -> Result<StartRunResult> {
        self.start_run(period_id, employee_ids, actor_id, None).await
    }

    async fn start_run(
        &self,
        period_id: i64,
        employee_ids: Option<Vec<i64>>,
        actor_id: i64,
        retry_of: Option<i64>,
    ) -> Result<StartRunResult> {
        let _guard = self.period_locks.acquire(period_id).await;

        let accepted = if retry_of.is_some() {
            RETRY_SOURCES
        } else {
            START_SOURCES
        };

        let period = self.ctx.periods().get(period_id).await?;
        if !accepted.contains(&period.status) {
            return Err(PayrollError::InvalidTransition {
                entity: entity_types::PAYROLL_PERIOD,
                from: period.status.to_string(),
                to: PeriodStatus::Processing.to_string(),
            });
        }

        if let Some(active) = self.ctx.runs().active_for_period(period_id).await? {
            return Err(PayrollError::Conflict(format!(
                "period {period_id} already has active run {}",
                active.id
            )));
        }

        let employees = self.resolve_employees(&period, employee_ids).await?;
        if employees.is_empty() {
            return Err(PayrollError::Validation(format!(
                "no employees to process for period {period_id}"
            )));
        }
        let employee_count = employees.len();

        let mut metadata = RunMetadata::for_employees(employees.clone());
        if let Some(source_run) = retry_of {
            metadata = metadata.with_retry_of(source_run);
        }

        let run = self
            .ctx
            .runs()
            .create_exclusive(NewProcessingRun {
                country_id: period.country_id,
                period_id: Some(period_id),
                started_by: Some(actor_id),
                metadata,
            })
            .await?;

        if let Err(e) = self
            .ctx
            .periods()
            .compare_and_set_status(period_id, accepted, PeriodStatus::Processing)
            .await
        {
            self.abandon_run(run.id, "period status changed before processing began")
                .await;
            return Err(e);
        }
        log_period_operation(
            "start",
            period_id,
            Some(period.status.as_str()),
            PeriodStatus::Processing.as_str(),
            Some(actor_id),
        );

        self.ctx
            .audit(
                AuditEntry::new(actor_id, audit_actions::RUN_STARTED, entity_types::PROCESSING_RUN)
                    .entity(run.id)
                    .details(json!({
                        "period_id": period_id,
                        "employee_count": employee_count,
                        "retry_of_run_id": retry_of,
                    })),
            )
            .await;

        let cancel = self.worker.cancellations().register(run.id);
        let job = RunJob {
            run_id: run.id,
            period_id,
            country_id: period.country_id,
            employee_ids: employees,
            cancel,
        };
        if let Err(e) = self.worker.submit(job).await {
            self.worker.cancellations().remove(run.id);
            self.abandon_run(run.id, "pipeline worker unavailable").await;
            if let Err(revert) = self
                .ctx
                .periods()
                .compare_and_set_status(period_id, &[PeriodStatus::Processing], period.status)
                .await
            {
                warn!(period_id, error = %revert, "Could not restore period after failed hand-off");
            }
            return Err(e);
        }

        log_run_operation(
            "start",
            Some(run.id),
            Some(period_id),
            run.status.as_str(),
            Some(&format!("employees={employee_count}")),
        );

        Ok(StartRunResult {
            run_id: run.id,
            employee_count,
        })
    }

    /// Explicit ids in first-seen order, or the active employees of the
    /// period's country
    async fn resolve_employees(
        &self,
        period: &PayrollPeriod,
        employee_ids: Option<Vec<i64>>,
    ) -> Result<Vec<i64>> {
        let candidates = match employee_ids {
            Some(ids) => ids,
            None => self
                .ctx
                .collaborators
                .employment
                .list_active(EmploymentFilter::active_in_country(period.country_id))
                .await
                .map_err(|e| {
                    PayrollError::collaborator(collaborators::EMPLOYMENT_DIRECTORY, format!("{e:#}"))
                })?
                .into_iter()
                .filter(|record| record.active)
                .map(|record| record.user_id)
                .collect(),
        };

        let mut seen = HashSet::with_capacity(candidates.len());
        Ok(candidates
            .into_iter()
            .filter(|user_id| seen.insert(*user_id))
            .collect())
    }

    async fn abandon_run(&self, run_id: i64, reason: &str) {
        let details = ErrorDetails {
            kind: "internal".to_string(),
            stage: None,
            message: reason.to_string(),
        };
        if let Err(e) = self.ctx.runs().mark_failed(run_id, reason, Some(details)).await {
            warn!(run_id, error = %e, "Could not fail abandoned run");
        }
    }

    /// Cancel an active run and reopen its period
    #[instrument(skip(self))]
    pub async fn stop(&self, run_id: i64, actor_id: i64) -> Result<ProcessingRun> {
        let run = self.ctx.runs().get(run_id).await?;
        let _guard = match run.period_id {
            Some(period_id) => Some(self.period_locks.acquire(period_id).await),
            None => None,
        };

        let cancelled = self.ctx.runs().mark_cancelled(run_id).await?;
        self.worker.cancellations().cancel(run_id);

        if let Some(period_id) = cancelled.period_id {
            match self
                .ctx
                .periods()
                .apply_event(period_id, PeriodEvent::RevertToOpen)
                .await
            {
                Ok(period) => log_period_operation(
                    "stop",
                    period_id,
                    Some(PeriodStatus::Processing.as_str()),
                    period.status.as_str(),
                    Some(actor_id),
                ),
                Err(PayrollError::InvalidTransition { from, .. }) => {
                    warn!(period_id, status = %from, "Period not in processing; left unchanged");
                }
                Err(e) => return Err(e),
            }
        }

        self.ctx
            .audit(
                AuditEntry::new(actor_id, audit_actions::RUN_STOPPED, entity_types::PROCESSING_RUN)
                    .entity(run_id)
                    .details(json!({
                        "period_id": cancelled.period_id,
                        "previous_status": run.status,
                    })),
            )
            .await;
        log_run_operation("stop", Some(run_id), cancelled.period_id, cancelled.status.as_str(), None);

        Ok(cancelled)
    }

    /// Start a new run for the failed employees of a finished run.
    ///
    /// `employee_ids` defaults to the failures recorded in the run's metadata.
    #[instrument(skip(self, employee_ids))]
    pub async fn retry_failed_employees(
        &self,
        run_id: i64,
        employee_ids: Option<Vec<i64>>,
        actor_id: i64,
    ) -> Result<StartRunResult> {
        let run = self.ctx.runs().get(run_id).await?;
        if !run.status.is_retryable() {
            return Err(PayrollError::Validation(format!(
                "run {run_id} is {}; only completed or failed runs can be retried",
                run.status
            )));
        }
        let period_id = run.period_id.ok_or_else(|| {
            PayrollError::Validation(format!("run {run_id} is not attached to a period"))
        })?;

        let employees = employee_ids.unwrap_or_else(|| run.failed_employee_ids());
        if employees.is_empty() {
            return Err(PayrollError::Validation(format!(
                "run {run_id} has no failed employees to retry"
            )));
        }

        let result = self
            .start_run(period_id, Some(employees), actor_id, Some(run_id))
            .await?;

        self.ctx
            .audit(
                AuditEntry::new(actor_id, audit_actions::RUN_RETRIED, entity_types::PROCESSING_RUN)
                    .entity(result.run_id)
                    .details(json!({
                        "retry_of_run_id": run_id,
                        "period_id": period_id,
                        "employee_count": result.employee_count,
                    })),
            )
            .await;
        info!(run_id, new_run_id = result.run_id, "Retry run created");

        Ok(result)
    }

    /// Most recent run of the period with derived progress
    pub async fn get_status(&self, period_id: i64) -> Result<RunStatusReport> {
        self.ctx.periods().get(period_id).await?;
        let latest = self.ctx.runs().latest_for_period(period_id).await?;
        Ok(RunStatusReport::for_run(period_id, latest))
    }

    /// Newest-first run history of the period, across retries
    pub async fn run_history(&self, period_id: i64) -> Result<Vec<ProcessingRun>> {
        self.ctx.runs().list_by_period(period_id).await
    }
}

impl std::fmt::Debug for PayrollOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayrollOrchestrator")
            .field("worker", &self.worker)
            .field("locked_periods", &self.period_locks.len())
            .finish()
    }
}
