//! # Run Pipeline
//!
//! The background body of one processing run:
//!
//! 1. `started → in_progress`
//! 2. fetch payroll-ready timesheets (`timesheet_fetch` metric)
//! 3. fetch payroll-ready leave (`leave_fetch` metric)
//! 4. per employee: calculate, store payslip, render PDF. Failures and panics
//!    are caught per employee and recorded; progress is persisted after every
//!    employee by the single consuming loop
//! 5. average calculation/storage/PDF metrics over successful employees
//! 6. best-effort notifications (`notification_send` metric)
//! 7. `processing_time` metric, payslips marked available, run completed,
//!    period completed only when no employee failed
//!
//! An error escaping any stage is an infrastructure failure: it is returned as
//! [`PipelineFailure`] and the worker records it on the run. The cancellation
//! token is checked between stages and raced against the employee stream.

use super::context::OrchestrationContext;
use crate::constants::{collaborators, metric_names};
use crate::error::{PayrollError, Result};
use crate::metrics::StageTimer;
use crate::models::{
    CalculationRequest, EmployeeFailure, EmployeeStage, ErrorDetails, MetricPayload, MetricType,
    NewMetric, Payslip, PipelineStage, RunTimings,
};
use crate::state_machine::{PeriodEvent, RunStatus};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Work item queued on the pipeline worker
#[derive(Debug, Clone)]
pub struct RunJob {
    pub run_id: i64,
    pub period_id: i64,
    pub country_id: i64,
    pub employee_ids: Vec<i64>,
    pub cancel: CancellationToken,
}

impl RunJob {
    /// Tag a metric with this run, its period and country
    fn tag(&self, metric: NewMetric) -> NewMetric {
        metric
            .for_run(self.run_id)
            .for_period(self.period_id)
            .for_country(self.country_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { processed: i32, failed: i32 },
    /// Stopped by the cancellation token or an external status change
    Cancelled { processed: i32, failed: i32 },
}

/// Infrastructure failure that aborts the run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub error: PayrollError,
}

impl PipelineFailure {
    pub fn details(&self) -> ErrorDetails {
        ErrorDetails::from_error(&self.error, Some(self.stage))
    }
}

type StageResult<T> = std::result::Result<T, PipelineFailure>;

trait AtStage<T> {
    fn at(self, stage: PipelineStage) -> StageResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: PipelineStage) -> StageResult<T> {
        self.map_err(|error| PipelineFailure { stage, error })
    }
}

fn collaborator_error(name: &'static str) -> impl FnOnce(anyhow::Error) -> PayrollError {
    move |e| PayrollError::collaborator(name, format!("{e:#}"))
}

struct EmployeeSuccess {
    payslip: Payslip,
    calculation_ms: f64,
    storage_ms: f64,
    pdf_ms: f64,
}

#[derive(Default)]
struct EmployeeBatch {
    processed: i32,
    successes: Vec<EmployeeSuccess>,
    failures: Vec<EmployeeFailure>,
    cancelled: bool,
}

impl EmployeeBatch {
    fn failed(&self) -> i32 {
        self.failures.len() as i32
    }
}

#[instrument(skip_all, fields(run_id = job.run_id, period_id = job.period_id))]
pub async fn execute(ctx: &OrchestrationContext, job: &RunJob) -> StageResult<PipelineOutcome> {
    let run_timer = StageTimer::start();
    let mut timings = RunTimings::default();

    if job.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled {
            processed: 0,
            failed: 0,
        });
    }

    let run = match ctx.runs().mark_in_progress(job.run_id).await {
        Ok(run) => run,
        Err(e) => return settle_rejected_transition(ctx, job, e, PipelineStage::Initialization, 0, 0).await,
    };
    let mut metadata = run.metadata;
    info!(employees = job.employee_ids.len(), "Pipeline started");

    let timer = StageTimer::start();
    let timesheets = ctx
        .collaborators
        .timesheets
        .payroll_ready_timesheets(job.period_id)
        .await
        .map_err(collaborator_error(collaborators::TIMESHEET_SOURCE))
        .at(PipelineStage::TimesheetFetch)?;
    timings.timesheet_fetch_ms = timer.elapsed_ms();
    ctx.recorder
        .record_best_effort(
            job.tag(NewMetric::timing(
                MetricType::TimesheetFetch,
                metric_names::TIMESHEET_FETCH,
                timings.timesheet_fetch_ms,
            ))
            .with_payload(MetricPayload::Fetch {
                record_count: timesheets.len(),
            }),
        )
        .await;

    if job.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled {
            processed: 0,
            failed: 0,
        });
    }

    let timer = StageTimer::start();
    let leaves = ctx
        .collaborators
        .leaves
        .payroll_ready_leaves(job.period_id, job.country_id)
        .await
        .map_err(collaborator_error(collaborators::LEAVE_SOURCE))
        .at(PipelineStage::LeaveFetch)?;
    timings.leave_fetch_ms = timer.elapsed_ms();
    ctx.recorder
        .record_best_effort(
            job.tag(NewMetric::timing(
                MetricType::LeaveFetch,
                metric_names::LEAVE_FETCH,
                timings.leave_fetch_ms,
            ))
            .with_payload(MetricPayload::Fetch {
                record_count: leaves.len(),
            }),
        )
        .await;
    debug!(
        timesheets = timesheets.len(),
        leaves = leaves.len(),
        "Inputs fetched"
    );

    let timer = StageTimer::start();
    let batch = process_employees(ctx, job).await?;
    timings.employee_processing_ms = timer.elapsed_ms();
    let (processed, failed) = (batch.processed, batch.failed());

    if batch.cancelled || job.cancel.is_cancelled() {
        info!(processed, failed, "Pipeline cancelled during employee processing");
        return Ok(PipelineOutcome::Cancelled { processed, failed });
    }

    record_employee_averages(ctx, job, &batch.successes).await;

    if job.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled { processed, failed });
    }
    timings.notification_ms = notify_employees(ctx, job, &batch.successes).await;

    if job.cancel.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled { processed, failed });
    }

    timings.total_ms = run_timer.elapsed_ms();
    timings.average_per_employee_ms = if processed > 0 {
        timings.employee_processing_ms / f64::from(processed)
    } else {
        0.0
    };
    ctx.recorder
        .record_best_effort(
            job.tag(NewMetric::timing(
                MetricType::ProcessingTime,
                metric_names::RUN_PROCESSING,
                timings.total_ms,
            ))
            .with_payload(MetricPayload::Processing {
                total_employees_processed: processed as u32,
                employees_failed: failed as u32,
                average_time_per_employee_ms: timings.average_per_employee_ms,
            }),
        )
        .await;

    for success in &batch.successes {
        ctx.collaborators
            .payslips
            .mark_available(success.payslip.id)
            .await
            .map_err(collaborator_error(collaborators::PAYSLIP_STORE))
            .at(PipelineStage::Finalization)?;
    }

    metadata.failed_employees = batch.failures;
    metadata.timings = Some(timings);
    if let Err(e) = ctx
        .runs()
        .mark_completed(job.run_id, processed, failed, Some(metadata))
        .await
    {
        return settle_rejected_transition(ctx, job, e, PipelineStage::Finalization, processed, failed)
            .await;
    }

    if failed == 0 {
        if let Err(e) = ctx
            .periods()
            .apply_event(job.period_id, PeriodEvent::CompleteProcessing)
            .await
        {
            warn!(error = %e, "Run completed but period could not be marked completed");
        }
    }

    info!(processed, failed, total_ms = run_timer.elapsed_ms(), "Pipeline completed");
    Ok(PipelineOutcome::Completed { processed, failed })
}

/// A rejected run transition means someone else moved the run. A cancelled
/// run is a normal exit; anything else is a failure at `stage`.
async fn settle_rejected_transition(
    ctx: &OrchestrationContext,
    job: &RunJob,
    error: PayrollError,
    stage: PipelineStage,
    processed: i32,
    failed: i32,
) -> StageResult<PipelineOutcome> {
    if matches!(error, PayrollError::InvalidTransition { .. }) {
        let current = ctx.runs().get(job.run_id).await.at(stage)?;
        if current.status == RunStatus::Cancelled {
            return Ok(PipelineOutcome::Cancelled { processed, failed });
        }
    }
    Err(PipelineFailure { stage, error })
}

async fn process_employees(
    ctx: &OrchestrationContext,
    job: &RunJob,
) -> StageResult<EmployeeBatch> {
    let concurrency = ctx.config.max_concurrent_employees.max(1);
    // Built up front so the spawned pipeline future stays `Send`
    let pending: Vec<_> = job
        .employee_ids
        .iter()
        .map(|&user_id| process_employee(ctx, job, user_id))
        .collect();
    let mut outcomes = stream::iter(pending).buffer_unordered(concurrency);

    let mut batch = EmployeeBatch::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => {
                batch.cancelled = true;
                break;
            }
            next = outcomes.next() => next,
        };
        let Some(outcome) = next else { break };

        batch.processed += 1;
        match outcome {
            Ok(success) => batch.successes.push(success),
            Err(failure) => {
                warn!(
                    user_id = failure.user_id,
                    stage = ?failure.stage,
                    error = %failure.error,
                    "Employee failed"
                );
                batch.failures.push(failure);
            }
        }

        let applied = ctx
            .runs()
            .update_progress(job.run_id, batch.processed, batch.failed())
            .await
            .at(PipelineStage::EmployeeProcessing)?;
        if !applied {
            // Run left the active states underneath us
            batch.cancelled = true;
            break;
        }
    }

    Ok(batch)
}

async fn process_employee(
    ctx: &OrchestrationContext,
    job: &RunJob,
    user_id: i64,
) -> std::result::Result<EmployeeSuccess, EmployeeFailure> {
    let failure = |stage: EmployeeStage| move |error: String| EmployeeFailure { user_id, stage, error };

    let request = CalculationRequest {
        user_id,
        country_id: job.country_id,
        period_id: job.period_id,
        include_overtime: ctx.config.include_overtime,
        include_night_shift: ctx.config.include_night_shift,
    };

    let timer = StageTimer::start();
    let result = contain(ctx.collaborators.calculator.calculate(request))
        .await
        .map_err(failure(EmployeeStage::Calculation))?;
    let calculation_ms = timer.elapsed_ms();

    let timer = StageTimer::start();
    let payslip = contain(ctx.collaborators.payslips.save(&result))
        .await
        .map_err(failure(EmployeeStage::PayslipStorage))?;
    let storage_ms = timer.elapsed_ms();

    let timer = StageTimer::start();
    contain(ctx.collaborators.pdf.generate(&payslip))
        .await
        .map_err(failure(EmployeeStage::PdfGeneration))?;
    let pdf_ms = timer.elapsed_ms();

    Ok(EmployeeSuccess {
        payslip,
        calculation_ms,
        storage_ms,
        pdf_ms,
    })
}

/// Run a collaborator call, turning both errors and panics into a message
async fn contain<T, F>(call: F) -> std::result::Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn record_employee_averages(
    ctx: &OrchestrationContext,
    job: &RunJob,
    successes: &[EmployeeSuccess],
) {
    if successes.is_empty() {
        return;
    }

    let count = successes.len();
    let mean = |value: fn(&EmployeeSuccess) -> f64| {
        successes.iter().map(value).sum::<f64>() / count as f64
    };
    let payload = MetricPayload::EmployeeAverage {
        employee_count: count,
    };

    ctx.recorder
        .record_batch(vec![
            job.tag(NewMetric::timing(
                MetricType::CalculationTime,
                metric_names::AVERAGE_CALCULATION,
                mean(|s| s.calculation_ms),
            ))
            .with_payload(payload.clone()),
            job.tag(NewMetric::timing(
                MetricType::PayslipStorage,
                metric_names::AVERAGE_PAYSLIP_STORAGE,
                mean(|s| s.storage_ms),
            ))
            .with_payload(payload.clone()),
            job.tag(NewMetric::timing(
                MetricType::PdfGeneration,
                metric_names::AVERAGE_PDF_GENERATION,
                mean(|s| s.pdf_ms),
            ))
            .with_payload(payload),
        ])
        .await;
}

async fn notify_employee(
    ctx: &OrchestrationContext,
    success: &EmployeeSuccess,
) -> (i64, std::result::Result<(), String>) {
    let outcome = contain(ctx.collaborators.notifier.notify_available(&success.payslip)).await;
    (success.payslip.user_id, outcome)
}

/// Returns elapsed milliseconds; individual failures never escape
async fn notify_employees(
    ctx: &OrchestrationContext,
    job: &RunJob,
    successes: &[EmployeeSuccess],
) -> f64 {
    let timer = StageTimer::start();
    let concurrency = ctx.config.max_concurrent_employees.max(1);

    let pending: Vec<_> = successes
        .iter()
        .map(|success| notify_employee(ctx, success))
        .collect();
    let results: Vec<(i64, std::result::Result<(), String>)> = stream::iter(pending)
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut sent = 0;
    for (user_id, outcome) in &results {
        match outcome {
            Ok(()) => sent += 1,
            Err(error) => warn!(
                user_id,
                collaborator = collaborators::NOTIFIER,
                error = %error,
                "Payslip notification failed"
            ),
        }
    }

    let elapsed = timer.elapsed_ms();
    ctx.recorder
        .record_best_effort(
            job.tag(NewMetric::timing(
                MetricType::NotificationSend,
                metric_names::NOTIFICATION_SEND,
                elapsed,
            ))
            .with_payload(MetricPayload::Notification {
                attempted: results.len(),
                sent,
            }),
        )
        .await;

    elapsed
}
