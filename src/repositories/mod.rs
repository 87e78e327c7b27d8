//! # Repositories
//!
//! Storage seams for the three stores the orchestrator owns: payroll periods,
//! the processing run log and the metric series.
//!
//! Every implementation must uphold two guarantees the orchestrator relies on:
//!
//! - **One active run per period**: [`RunLogRepository::create_exclusive`] fails
//!   with [`PayrollError::Conflict`] instead of inserting a second run in
//!   `started`/`in_progress` for the same period. PostgreSQL enforces this with a
//!   partial unique index; the in-memory store checks and inserts under one lock.
//! - **Compare-and-set status writes**: period and run status changes only apply
//!   when the current status is one of the expected sources.
//!
//! [`PayrollError::Conflict`]: crate::error::PayrollError::Conflict

pub mod memory;
pub mod postgres;

use crate::constants::entity_types::{PAYROLL_PERIOD, PROCESSING_RUN};
use crate::error::{PayrollError, Result};
use crate::models::{
    ErrorDetails, Metric, MetricQuery, MetricType, NewMetric, NewPayrollPeriod, NewProcessingRun,
    PayrollPeriod, ProcessingRun, RunMetadata, RunPatch, RunStats, RunTransition,
    RunWindowCounts,
};
use crate::state_machine::{PeriodEvent, PeriodStateMachine, PeriodStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryMetricRepository, InMemoryPeriodRepository, InMemoryRunLogRepository};
pub use postgres::{PgMetricRepository, PgPeriodRepository, PgRunLogRepository};

#[async_trait]
pub trait PeriodRepository: Send + Sync {
    async fn insert(&self, period: NewPayrollPeriod) -> Result<PayrollPeriod>;

    async fn find_by_id(&self, id: i64) -> Result<Option<PayrollPeriod>>;

    /// Set `new_status` only if the current status is in `expected`.
    ///
    /// Fails with `NotFound` for a missing period and `InvalidTransition` when
    /// the current status is not an expected source.
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: &[PeriodStatus],
        new_status: PeriodStatus,
    ) -> Result<PayrollPeriod>;

    async fn get(&self, id: i64) -> Result<PayrollPeriod> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| PayrollError::not_found(PAYROLL_PERIOD, id))
    }

    /// Apply a period event through the period state machine
    async fn apply_event(&self, id: i64, event: PeriodEvent) -> Result<PayrollPeriod> {
        self.compare_and_set_status(
            id,
            PeriodStateMachine::allowed_sources(event),
            PeriodStateMachine::destination(event),
        )
        .await
    }
}

#[async_trait]
pub trait RunLogRepository: Send + Sync {
    /// Insert a `started` run unless the period already has an active run
    async fn create_exclusive(&self, new_run: NewProcessingRun) -> Result<ProcessingRun>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ProcessingRun>>;

    /// Generic update of non-status fields
    async fn update(&self, id: i64, patch: RunPatch) -> Result<ProcessingRun>;

    /// Status change guarded by the run state machine's allowed sources
    async fn transition(&self, id: i64, transition: RunTransition) -> Result<ProcessingRun>;

    /// Monotonic progress snapshot; ignored once the run is no longer active.
    /// Returns whether the snapshot was applied.
    async fn update_progress(&self, id: i64, processed: i32, failed: i32) -> Result<bool>;

    /// Newest first
    async fn list_by_country(&self, country_id: i64, limit: usize) -> Result<Vec<ProcessingRun>>;

    /// Newest first
    async fn list_by_period(&self, period_id: i64) -> Result<Vec<ProcessingRun>>;

    async fn latest_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>>;

    async fn active_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>>;

    async fn stats_for_country(&self, country_id: i64) -> Result<RunStats>;

    /// Runs currently in `started` or `in_progress`, across all periods
    async fn count_active(&self) -> Result<i64>;

    /// Runs started inside `[since, until]`
    async fn window_counts(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<RunWindowCounts>;

    async fn get(&self, id: i64) -> Result<ProcessingRun> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| PayrollError::not_found(PROCESSING_RUN, id))
    }

    async fn mark_in_progress(&self, id: i64) -> Result<ProcessingRun> {
        self.transition(id, RunTransition::begin()).await
    }

    async fn mark_completed(
        &self,
        id: i64,
        processed: i32,
        failed: i32,
        metadata: Option<RunMetadata>,
    ) -> Result<ProcessingRun> {
        self.transition(id, RunTransition::complete(processed, failed, metadata))
            .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        message: &str,
        details: Option<ErrorDetails>,
    ) -> Result<ProcessingRun> {
        self.transition(id, RunTransition::fail(message, details)).await
    }

    async fn mark_cancelled(&self, id: i64) -> Result<ProcessingRun> {
        self.transition(id, RunTransition::cancel()).await
    }
}

/// Mean value of one metric type under a filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeAverage {
    pub metric_type: MetricType,
    pub average: f64,
    pub count: i64,
}

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn insert(&self, metric: NewMetric) -> Result<Metric>;

    /// All-or-nothing insert; returns the number of rows written
    async fn insert_batch(&self, metrics: Vec<NewMetric>) -> Result<usize>;

    /// Newest first, at most `limit` rows; `query.limit` is ignored here
    async fn query(&self, query: &MetricQuery, limit: usize) -> Result<Vec<Metric>>;

    /// Uncapped values of one type inside an optional window
    async fn values(
        &self,
        metric_type: MetricType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<f64>>;

    /// Per-type averages over rows matching `query`
    async fn averages_by_type(&self, query: &MetricQuery) -> Result<Vec<TypeAverage>>;
}
