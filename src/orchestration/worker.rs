//! # Pipeline Worker
//!
//! Supervised executor for run pipelines. Runs are submitted over a bounded
//! `mpsc` queue; a dispatcher task spawns each onto a `JoinSet`. Every run is
//! wrapped in `catch_unwind`, so a panic becomes a `failed` run with
//! `error_details.kind = "panic"` rather than a lost task.
//!
//! Once a run leaves the worker a [`RunCompletion`] is broadcast with the
//! run's final state as read back from the run log.

use super::cancellation::CancellationRegistry;
use super::context::OrchestrationContext;
use super::pipeline::{self, panic_message, PipelineOutcome, RunJob};
use super::types::RunCompletion;
use crate::config::OrchestrationConfig;
use crate::error::{PayrollError, Result};
use crate::logging::log_error;
use crate::models::ErrorDetails;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMPLETION_CHANNEL_CAPACITY: usize = 256;

pub struct PipelineWorker {
    jobs: mpsc::Sender<RunJob>,
    completions: broadcast::Sender<RunCompletion>,
    cancellations: Arc<CancellationRegistry>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineWorker {
    /// Start the dispatcher; must be called inside a Tokio runtime
    pub fn spawn(ctx: Arc<OrchestrationContext>, config: &OrchestrationConfig) -> Self {
        let (jobs, job_rx) = mpsc::channel(config.worker_queue_capacity.max(1));
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        let cancellations = Arc::new(CancellationRegistry::new());
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            ctx,
            completions: completions.clone(),
            cancellations: cancellations.clone(),
            shutdown: shutdown.clone(),
            grace: config.shutdown_grace(),
        };
        let handle = tokio::spawn(dispatcher.run(job_rx));

        info!(
            queue_capacity = config.worker_queue_capacity,
            max_concurrent_employees = config.max_concurrent_employees,
            "Pipeline worker started"
        );

        Self {
            jobs,
            completions,
            cancellations,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Queue a run; waits for queue capacity
    pub async fn submit(&self, job: RunJob) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PayrollError::Internal(
                "pipeline worker is shut down".to_string(),
            ));
        }
        let run_id = job.run_id;
        self.jobs.send(job).await.map_err(|_| {
            PayrollError::Internal(format!("pipeline worker rejected run {run_id}"))
        })?;
        debug!(run_id, "Run queued");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunCompletion> {
        self.completions.subscribe()
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop accepting runs, cancel in-flight ones and wait up to the grace
    /// period for them to settle
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Pipeline dispatcher terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for PipelineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineWorker")
            .field("in_flight", &self.cancellations.len())
            .field("running", &self.is_running())
            .finish()
    }
}

struct Dispatcher {
    ctx: Arc<OrchestrationContext>,
    completions: broadcast::Sender<RunCompletion>,
    cancellations: Arc<CancellationRegistry>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl Dispatcher {
    async fn run(self, mut job_rx: mpsc::Receiver<RunJob>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = job_rx.recv() => match job {
                    Some(job) => {
                        in_flight.spawn(supervise(
                            self.ctx.clone(),
                            job,
                            self.completions.clone(),
                            self.cancellations.clone(),
                        ));
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Supervised run task did not finish cleanly");
                    }
                }
            }
        }

        // Runs queued but never started are failed so they do not hold the period
        job_rx.close();
        while let Ok(job) = job_rx.try_recv() {
            let details = ErrorDetails {
                kind: "shutdown".to_string(),
                stage: None,
                message: "pipeline worker shut down before the run started".to_string(),
            };
            record_failure(&self.ctx, job.run_id, details).await;
            self.cancellations.remove(job.run_id);
        }

        self.cancellations.cancel_all();
        let drained = tokio::time::timeout(self.grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                grace_ms = self.grace.as_millis() as u64,
                "Aborting runs still in flight after shutdown grace period"
            );
            in_flight.abort_all();
        }
        info!("Pipeline worker stopped");
    }
}

async fn supervise(
    ctx: Arc<OrchestrationContext>,
    job: RunJob,
    completions: broadcast::Sender<RunCompletion>,
    cancellations: Arc<CancellationRegistry>,
) {
    let run_id = job.run_id;

    match AssertUnwindSafe(pipeline::execute(&ctx, &job))
        .catch_unwind()
        .await
    {
        Ok(Ok(PipelineOutcome::Completed { processed, failed })) => {
            debug!(run_id, processed, failed, "Run finished");
        }
        Ok(Ok(PipelineOutcome::Cancelled { processed, failed })) => {
            settle_interrupted(&ctx, run_id, processed, failed).await;
        }
        Ok(Err(failure)) => {
            log_error(
                "pipeline",
                failure.stage.as_str(),
                &failure.error.to_string(),
                Some(&format!("run_id={run_id}")),
            );
            record_failure(&ctx, run_id, failure.details()).await;
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(run_id, panic = %message, "Run pipeline panicked");
            record_failure(&ctx, run_id, ErrorDetails::panic(message, None)).await;
        }
    }

    cancellations.remove(run_id);

    match ctx.runs().find_by_id(run_id).await {
        Ok(Some(run)) => {
            // No subscribers is fine
            let _ = completions.send(RunCompletion {
                run_id,
                period_id: run.period_id,
                status: run.status,
                employees_processed: run.employees_processed,
                employees_failed: run.employees_failed,
            });
        }
        Ok(None) => warn!(run_id, "Finished run vanished from the run log"),
        Err(e) => warn!(run_id, error = %e, "Could not read back finished run"),
    }
}

/// A pipeline that exits early without a stop leaves the run active; close it
/// out as failed so the period's exclusion slot is released
async fn settle_interrupted(ctx: &OrchestrationContext, run_id: i64, processed: i32, failed: i32) {
    match ctx.runs().get(run_id).await {
        Ok(run) if run.status.is_active() => {
            warn!(run_id, processed, failed, "Run interrupted without a stop request");
            let details = ErrorDetails {
                kind: "shutdown".to_string(),
                stage: None,
                message: "run interrupted before completion".to_string(),
            };
            record_failure(ctx, run_id, details).await;
        }
        Ok(run) => debug!(run_id, status = %run.status, "Run cancelled"),
        Err(e) => warn!(run_id, error = %e, "Could not inspect interrupted run"),
    }
}

async fn record_failure(ctx: &OrchestrationContext, run_id: i64, details: ErrorDetails) {
    let message = details.message.clone();
    match ctx.runs().mark_failed(run_id, &message, Some(details)).await {
        Ok(_) => info!(run_id, error = %message, "Run marked failed"),
        Err(PayrollError::InvalidTransition { from, .. }) => {
            debug!(run_id, status = %from, "Run already settled; failure not recorded");
        }
        Err(e) => log_error(
            "pipeline_worker",
            "record_failure",
            &e.to_string(),
            Some(&format!("run_id={run_id} original_error={message}")),
        ),
    }
}
