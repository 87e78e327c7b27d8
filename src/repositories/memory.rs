//! In-memory repositories for embedding and tests.
//!
//! Periods live in a `DashMap` (per-key locking is enough for compare-and-set).
//! Runs and metrics sit behind a `parking_lot::RwLock` so the active-run check
//! and the insert happen under one write lock.

use super::{MetricRepository, PeriodRepository, RunLogRepository, TypeAverage};
use crate::constants::entity_types::{PAYROLL_PERIOD, PROCESSING_RUN};
use crate::error::{PayrollError, Result};
use crate::models::{
    Metric, MetricQuery, MetricType, NewMetric, NewPayrollPeriod, NewProcessingRun,
    PayrollPeriod, ProcessingRun, RunPatch, RunStats, RunTransition, RunWindowCounts,
};
use crate::state_machine::{PeriodStatus, RunStateMachine, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct InMemoryPeriodRepository {
    periods: DashMap<i64, PayrollPeriod>,
    next_id: AtomicI64,
}

impl InMemoryPeriodRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

#[async_trait]
impl PeriodRepository for InMemoryPeriodRepository {
    async fn insert(&self, period: NewPayrollPeriod) -> Result<PayrollPeriod> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = PayrollPeriod {
            id,
            country_id: period.country_id,
            name: period.name,
            start_date: period.start_date,
            end_date: period.end_date,
            pay_date: period.pay_date,
            status: period.status,
            total_employees: 0,
            total_amount: 0.0,
            created_at: now,
            updated_at: now,
        };
        self.periods.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<PayrollPeriod>> {
        Ok(self.periods.get(&id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: &[PeriodStatus],
        new_status: PeriodStatus,
    ) -> Result<PayrollPeriod> {
        let mut entry = self
            .periods
            .get_mut(&id)
            .ok_or_else(|| PayrollError::not_found(PAYROLL_PERIOD, id))?;

        if !expected.contains(&entry.status) {
            return Err(PayrollError::InvalidTransition {
                entity: PAYROLL_PERIOD,
                from: entry.status.to_string(),
                to: new_status.to_string(),
            });
        }

        entry.status = new_status;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunLogRepository {
    runs: RwLock<BTreeMap<i64, ProcessingRun>>,
    next_id: AtomicI64,
}

impl InMemoryRunLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run, oldest first
    pub fn all(&self) -> Vec<ProcessingRun> {
        self.runs.read().values().cloned().collect()
    }

    fn newest_first<'a>(runs: impl Iterator<Item = &'a ProcessingRun>) -> Vec<ProcessingRun> {
        let mut selected: Vec<ProcessingRun> = runs.cloned().collect();
        selected.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        selected
    }
}

#[async_trait]
impl RunLogRepository for InMemoryRunLogRepository {
    async fn create_exclusive(&self, new_run: NewProcessingRun) -> Result<ProcessingRun> {
        let mut runs = self.runs.write();

        if let Some(period_id) = new_run.period_id {
            if let Some(active) = runs
                .values()
                .find(|run| run.period_id == Some(period_id) && run.status.is_active())
            {
                return Err(PayrollError::Conflict(format!(
                    "period {period_id} already has active run {} ({})",
                    active.id, active.status
                )));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let run = ProcessingRun {
            id,
            country_id: new_run.country_id,
            period_id: new_run.period_id,
            status: RunStatus::Started,
            started_at: now,
            completed_at: None,
            employees_processed: 0,
            employees_failed: 0,
            error_message: None,
            error_details: None,
            metadata: new_run.metadata,
            started_by: new_run.started_by,
            updated_at: now,
        };
        runs.insert(id, run.clone());
        Ok(run)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ProcessingRun>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn update(&self, id: i64, patch: RunPatch) -> Result<ProcessingRun> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| PayrollError::not_found(PROCESSING_RUN, id))?;

        if let Some(metadata) = patch.metadata {
            run.metadata = metadata;
        }
        if let Some(message) = patch.error_message {
            run.error_message = Some(message);
        }
        if let Some(details) = patch.error_details {
            run.error_details = Some(details);
        }
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    async fn transition(&self, id: i64, transition: RunTransition) -> Result<ProcessingRun> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| PayrollError::not_found(PROCESSING_RUN, id))?;

        let target = RunStateMachine::target_state(run.status, transition.event)?;
        let finishes = transition.finishes_run();

        run.status = target;
        if let Some(processed) = transition.employees_processed {
            run.employees_processed = processed;
        }
        if let Some(failed) = transition.employees_failed {
            run.employees_failed = failed;
        }
        if let Some(message) = transition.error_message {
            run.error_message = Some(message);
        }
        if let Some(details) = transition.error_details {
            run.error_details = Some(details);
        }
        if let Some(metadata) = transition.metadata {
            run.metadata = metadata;
        }

        let now = Utc::now();
        if finishes {
            run.completed_at = Some(now);
        }
        run.updated_at = now;
        Ok(run.clone())
    }

    async fn update_progress(&self, id: i64, processed: i32, failed: i32) -> Result<bool> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| PayrollError::not_found(PROCESSING_RUN, id))?;

        if !run.status.is_active() {
            return Ok(false);
        }

        run.employees_processed = run.employees_processed.max(processed);
        run.employees_failed = run.employees_failed.max(failed);
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_by_country(&self, country_id: i64, limit: usize) -> Result<Vec<ProcessingRun>> {
        let runs = self.runs.read();
        let mut selected =
            Self::newest_first(runs.values().filter(|run| run.country_id == country_id));
        selected.truncate(limit);
        Ok(selected)
    }

    async fn list_by_period(&self, period_id: i64) -> Result<Vec<ProcessingRun>> {
        let runs = self.runs.read();
        Ok(Self::newest_first(
            runs.values().filter(|run| run.period_id == Some(period_id)),
        ))
    }

    async fn latest_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        Ok(self.list_by_period(period_id).await?.into_iter().next())
    }

    async fn active_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        Ok(self
            .runs
            .read()
            .values()
            .find(|run| run.period_id == Some(period_id) && run.status.is_active())
            .cloned())
    }

    async fn stats_for_country(&self, country_id: i64) -> Result<RunStats> {
        let runs = self.runs.read();
        let mut stats = RunStats::default();
        for run in runs.values().filter(|run| run.country_id == country_id) {
            stats.total += 1;
            match run.status {
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Failed => stats.failed += 1,
                RunStatus::Started | RunStatus::InProgress => stats.in_progress += 1,
                RunStatus::Cancelled => {}
            }
        }
        Ok(stats)
    }

    async fn count_active(&self) -> Result<i64> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|run| run.status.is_active())
            .count() as i64)
    }

    async fn window_counts(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<RunWindowCounts> {
        let runs = self.runs.read();
        let mut counts = RunWindowCounts::default();
        for run in runs
            .values()
            .filter(|run| run.started_at >= since && run.started_at <= until)
        {
            counts.total += 1;
            if run.status == RunStatus::Completed {
                counts.completed += 1;
            }
        }
        Ok(counts)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetricRepository {
    metrics: RwLock<Vec<Metric>>,
    next_id: AtomicI64,
}

impl InMemoryMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded metric in insertion order
    pub fn all(&self) -> Vec<Metric> {
        self.metrics.read().clone()
    }

    fn materialize(&self, metric: NewMetric) -> Metric {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Metric {
            id,
            metric_type: metric.metric_type,
            name: metric.name,
            value: metric.value,
            unit: metric.unit,
            period_id: metric.period_id,
            run_id: metric.run_id,
            user_id: metric.user_id,
            country_id: metric.country_id,
            additional_data: metric.additional_data,
            recorded_at: metric.recorded_at.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl MetricRepository for InMemoryMetricRepository {
    async fn insert(&self, metric: NewMetric) -> Result<Metric> {
        let record = self.materialize(metric);
        self.metrics.write().push(record.clone());
        Ok(record)
    }

    async fn insert_batch(&self, metrics: Vec<NewMetric>) -> Result<usize> {
        let records: Vec<Metric> = metrics
            .into_iter()
            .map(|metric| self.materialize(metric))
            .collect();
        let count = records.len();
        self.metrics.write().extend(records);
        Ok(count)
    }

    async fn query(&self, query: &MetricQuery, limit: usize) -> Result<Vec<Metric>> {
        let metrics = self.metrics.read();
        let mut selected: Vec<Metric> = metrics
            .iter()
            .filter(|metric| query.matches(metric))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        selected.truncate(limit);
        Ok(selected)
    }

    async fn values(
        &self,
        metric_type: MetricType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<f64>> {
        let query = MetricQuery::new().of_type(metric_type).between(from, to);
        Ok(self
            .metrics
            .read()
            .iter()
            .filter(|metric| query.matches(metric))
            .map(|metric| metric.value)
            .collect())
    }

    async fn averages_by_type(&self, query: &MetricQuery) -> Result<Vec<TypeAverage>> {
        let metrics = self.metrics.read();
        let mut sums: HashMap<MetricType, (f64, i64)> = HashMap::new();
        for metric in metrics.iter().filter(|metric| query.matches(metric)) {
            let entry = sums.entry(metric.metric_type).or_insert((0.0, 0));
            entry.0 += metric.value;
            entry.1 += 1;
        }

        let mut averages: Vec<TypeAverage> = sums
            .into_iter()
            .map(|(metric_type, (sum, count))| TypeAverage {
                metric_type,
                average: sum / count as f64,
                count,
            })
            .collect();
        averages.sort_by_key(|average| average.metric_type);
        Ok(averages)
    }
}
