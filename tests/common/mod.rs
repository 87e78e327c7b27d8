//! Shared integration-test harness: in-memory stores wired to scriptable
//! fake collaborators.

#![allow(dead_code)]

pub mod strategies;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use payroll_run_core::config::{MetricsConfig, OrchestrationConfig};
use payroll_run_core::metrics::MetricsAggregator;
use payroll_run_core::error::{PayrollError, Result};
use payroll_run_core::models::{
    AuditEntry, CalculationRequest, CalculationResult, EmploymentFilter, EmploymentRecord,
    LeaveRecord, Metric, MetricQuery, MetricType, NewMetric, NewPayrollPeriod, NewProcessingRun,
    PayrollPeriod, Payslip, PayslipStatus, ProcessingRun, RunPatch, RunStats, RunTransition,
    RunWindowCounts, Timesheet,
};
use payroll_run_core::orchestration::{
    AuditSink, BulkOperations, Collaborators, EmploymentDirectory, LeaveSource, Notifier,
    PayrollCalculator, PayrollOrchestrator, PayrollStores, PayslipStore, PdfRenderer,
    RunCompletion, TimesheetSource,
};
use payroll_run_core::repositories::{
    InMemoryMetricRepository, InMemoryPeriodRepository, InMemoryRunLogRepository,
    MetricRepository, PeriodRepository, RunLogRepository, TypeAverage,
};
use payroll_run_core::state_machine::PeriodStatus;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};

pub const COUNTRY_ID: i64 = 1;
pub const ACTOR_ID: i64 = 900;
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Employee ids scripted to fail or panic at one step
#[derive(Debug, Default)]
pub struct FailurePlan {
    failing: Mutex<HashSet<i64>>,
    panicking: Mutex<HashSet<i64>>,
}

impl FailurePlan {
    pub fn fail_for(&self, user_id: i64) {
        self.failing.lock().insert(user_id);
    }

    pub fn panic_for(&self, user_id: i64) {
        self.panicking.lock().insert(user_id);
    }

    pub fn clear(&self) {
        self.failing.lock().clear();
        self.panicking.lock().clear();
    }

    fn check(&self, user_id: i64, step: &str) -> anyhow::Result<()> {
        if self.panicking.lock().contains(&user_id) {
            panic!("{step} panicked for user {user_id}");
        }
        if self.failing.lock().contains(&user_id) {
            return Err(anyhow!("{step} failed for user {user_id}"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeEmploymentDirectory {
    records: Mutex<Vec<EmploymentRecord>>,
    pub unavailable: AtomicBool,
}

impl FakeEmploymentDirectory {
    pub fn add(&self, country_id: i64, user_ids: &[i64]) {
        let mut records = self.records.lock();
        for &user_id in user_ids {
            let id = records.len() as i64 + 1;
            records.push(EmploymentRecord {
                id,
                user_id,
                country_id,
                active: true,
            });
        }
    }
}

#[async_trait]
impl EmploymentDirectory for FakeEmploymentDirectory {
    async fn list_active(&self, filter: EmploymentFilter) -> anyhow::Result<Vec<EmploymentRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("employment directory unavailable"));
        }
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|record| record.country_id == filter.country_id)
            .filter(|record| !filter.active_only || record.active)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct FakeTimesheetSource {
    pub unavailable: AtomicBool,
}

#[async_trait]
impl TimesheetSource for FakeTimesheetSource {
    async fn payroll_ready_timesheets(&self, period_id: i64) -> anyhow::Result<Vec<Timesheet>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("timesheet service timed out"));
        }
        Ok(vec![Timesheet {
            id: 1,
            user_id: 1,
            period_id,
            regular_hours: 160.0,
            overtime_hours: 4.0,
            night_shift_hours: 0.0,
        }])
    }
}

#[derive(Debug, Default)]
pub struct FakeLeaveSource {
    pub unavailable: AtomicBool,
}

#[async_trait]
impl LeaveSource for FakeLeaveSource {
    async fn payroll_ready_leaves(
        &self,
        _period_id: i64,
        _country_id: i64,
    ) -> anyhow::Result<Vec<LeaveRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("leave service unavailable"));
        }
        Ok(Vec::new())
    }
}

/// Calculator with scripted failures and an optional gate that holds every
/// calculation until opened
pub struct FakeCalculator {
    pub plan: FailurePlan,
    pub requests: Mutex<Vec<CalculationRequest>>,
    pub entered: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for FakeCalculator {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            plan: FailurePlan::default(),
            requests: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate,
        }
    }
}

impl FakeCalculator {
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calculated_users(&self) -> Vec<i64> {
        self.requests.lock().iter().map(|request| request.user_id).collect()
    }
}

#[async_trait]
impl PayrollCalculator for FakeCalculator {
    async fn calculate(&self, request: CalculationRequest) -> anyhow::Result<CalculationResult> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        self.requests.lock().push(request);
        self.plan.check(request.user_id, "calculation")?;
        Ok(CalculationResult {
            user_id: request.user_id,
            period_id: request.period_id,
            gross_amount: 5000.0,
            net_amount: 4100.0,
            breakdown: json!({"base": 5000.0}),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakePayslipStore {
    pub plan: FailurePlan,
    next_id: AtomicI64,
    saved: Mutex<Vec<Payslip>>,
    pub fail_mark_available: AtomicBool,
}

impl FakePayslipStore {
    pub fn saved(&self) -> Vec<Payslip> {
        self.saved.lock().clone()
    }

    pub fn available_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .saved
            .lock()
            .iter()
            .filter(|payslip| payslip.status == PayslipStatus::Available)
            .map(|payslip| payslip.user_id)
            .collect();
        users.sort_unstable();
        users
    }
}

#[async_trait]
impl PayslipStore for FakePayslipStore {
    async fn save(&self, result: &CalculationResult) -> anyhow::Result<Payslip> {
        self.plan.check(result.user_id, "payslip storage")?;
        let payslip = Payslip {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: result.user_id,
            period_id: result.period_id,
            net_amount: result.net_amount,
            status: PayslipStatus::Draft,
        };
        self.saved.lock().push(payslip.clone());
        Ok(payslip)
    }

    async fn find_by_period(&self, period_id: i64) -> anyhow::Result<Vec<Payslip>> {
        Ok(self
            .saved
            .lock()
            .iter()
            .filter(|payslip| payslip.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn mark_available(&self, payslip_id: i64) -> anyhow::Result<()> {
        if self.fail_mark_available.load(Ordering::SeqCst) {
            return Err(anyhow!("document store rejected status update"));
        }
        let mut saved = self.saved.lock();
        let payslip = saved
            .iter_mut()
            .find(|payslip| payslip.id == payslip_id)
            .ok_or_else(|| anyhow!("payslip {payslip_id} not found"))?;
        payslip.status = PayslipStatus::Available;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePdfRenderer {
    pub plan: FailurePlan,
    pub rendered: Mutex<Vec<i64>>,
}

#[async_trait]
impl PdfRenderer for FakePdfRenderer {
    async fn generate(&self, payslip: &Payslip) -> anyhow::Result<()> {
        self.plan.check(payslip.user_id, "pdf generation")?;
        self.rendered.lock().push(payslip.user_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeNotifier {
    pub plan: FailurePlan,
    pub notified: Mutex<Vec<i64>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify_available(&self, payslip: &Payslip) -> anyhow::Result<()> {
        self.plan.check(payslip.user_id, "notification")?;
        self.notified.lock().push(payslip.user_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    pub unavailable: AtomicBool,
}

impl FakeAuditSink {
    pub fn actions(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditSink for FakeAuditSink {
    async fn log(&self, entry: AuditEntry) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("audit sink unavailable"));
        }
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// Metric store whose every call fails, as during a database outage
#[derive(Debug, Default)]
pub struct FailingMetricRepository {
    pub calls: AtomicUsize,
}

impl FailingMetricRepository {
    fn outage<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PayrollError::Database("metric store unavailable".to_string()))
    }
}

#[async_trait]
impl MetricRepository for FailingMetricRepository {
    async fn insert(&self, _metric: NewMetric) -> Result<Metric> {
        self.outage()
    }

    async fn insert_batch(&self, _metrics: Vec<NewMetric>) -> Result<usize> {
        self.outage()
    }

    async fn query(&self, _query: &MetricQuery, _limit: usize) -> Result<Vec<Metric>> {
        self.outage()
    }

    async fn values(
        &self,
        _metric_type: MetricType,
        _from: Option<DateTime<Utc>>,
        _to: Option<DateTime<Utc>>,
    ) -> Result<Vec<f64>> {
        self.outage()
    }

    async fn averages_by_type(&self, _query: &MetricQuery) -> Result<Vec<TypeAverage>> {
        self.outage()
    }
}

/// One-shot pause inside `latest_for_period`, after the read completes
#[derive(Debug, Default)]
pub struct LatestRunPause {
    armed: AtomicBool,
    pub reached: Notify,
    pub release: Notify,
}

impl LatestRunPause {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

/// Run log that delegates to the in-memory store and can hold one
/// `latest_for_period` caller until released
pub struct PausingRunLog {
    pub inner: Arc<InMemoryRunLogRepository>,
    pub pause: Arc<LatestRunPause>,
}

#[async_trait]
impl RunLogRepository for PausingRunLog {
    async fn create_exclusive(&self, new_run: NewProcessingRun) -> Result<ProcessingRun> {
        self.inner.create_exclusive(new_run).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ProcessingRun>> {
        self.inner.find_by_id(id).await
    }

    async fn update(&self, id: i64, patch: RunPatch) -> Result<ProcessingRun> {
        self.inner.update(id, patch).await
    }

    async fn transition(&self, id: i64, transition: RunTransition) -> Result<ProcessingRun> {
        self.inner.transition(id, transition).await
    }

    async fn update_progress(&self, id: i64, processed: i32, failed: i32) -> Result<bool> {
        self.inner.update_progress(id, processed, failed).await
    }

    async fn list_by_country(&self, country_id: i64, limit: usize) -> Result<Vec<ProcessingRun>> {
        self.inner.list_by_country(country_id, limit).await
    }

    async fn list_by_period(&self, period_id: i64) -> Result<Vec<ProcessingRun>> {
        self.inner.list_by_period(period_id).await
    }

    async fn latest_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        let latest = self.inner.latest_for_period(period_id).await;
        if self.pause.armed.swap(false, Ordering::SeqCst) {
            self.pause.reached.notify_one();
            self.pause.release.notified().await;
        }
        latest
    }

    async fn active_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        self.inner.active_for_period(period_id).await
    }

    async fn stats_for_country(&self, country_id: i64) -> Result<RunStats> {
        self.inner.stats_for_country(country_id).await
    }

    async fn count_active(&self) -> Result<i64> {
        self.inner.count_active().await
    }

    async fn window_counts(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<RunWindowCounts> {
        self.inner.window_counts(since, until).await
    }
}

pub struct TestHarness {
    pub periods: Arc<InMemoryPeriodRepository>,
    /// In-memory run log behind `run_log`
    pub runs: Arc<InMemoryRunLogRepository>,
    /// In-memory metrics; unused when `metric_store` is overridden
    pub metrics: Arc<InMemoryMetricRepository>,
    pub run_log: Arc<dyn RunLogRepository>,
    pub metric_store: Arc<dyn MetricRepository>,
    pub directory: Arc<FakeEmploymentDirectory>,
    pub timesheets: Arc<FakeTimesheetSource>,
    pub leaves: Arc<FakeLeaveSource>,
    pub calculator: Arc<FakeCalculator>,
    pub payslips: Arc<FakePayslipStore>,
    pub pdf: Arc<FakePdfRenderer>,
    pub notifier: Arc<FakeNotifier>,
    pub audit: Arc<FakeAuditSink>,
    pub orchestrator: Arc<PayrollOrchestrator>,
    pub bulk: BulkOperations,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(OrchestrationConfig::default())
    }

    pub fn with_config(config: OrchestrationConfig) -> Self {
        Self::build(config, |runs| runs as Arc<dyn RunLogRepository>, None)
    }

    /// Orchestrator reading and writing runs through `wrap(in_memory_run_log)`
    pub fn with_run_log<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<InMemoryRunLogRepository>) -> Arc<dyn RunLogRepository>,
    {
        Self::build(OrchestrationConfig::default(), wrap, None)
    }

    pub fn with_metric_store(metric_store: Arc<dyn MetricRepository>) -> Self {
        Self::build(
            OrchestrationConfig::default(),
            |runs| runs as Arc<dyn RunLogRepository>,
            Some(metric_store),
        )
    }

    fn build<F>(
        config: OrchestrationConfig,
        wrap_runs: F,
        metric_store: Option<Arc<dyn MetricRepository>>,
    ) -> Self
    where
        F: FnOnce(Arc<InMemoryRunLogRepository>) -> Arc<dyn RunLogRepository>,
    {
        let periods = Arc::new(InMemoryPeriodRepository::new());
        let runs = Arc::new(InMemoryRunLogRepository::new());
        let metrics = Arc::new(InMemoryMetricRepository::new());
        let run_log = wrap_runs(runs.clone());
        let metric_store: Arc<dyn MetricRepository> = match metric_store {
            Some(store) => store,
            None => metrics.clone() as Arc<dyn MetricRepository>,
        };
        let directory = Arc::new(FakeEmploymentDirectory::default());
        let timesheets = Arc::new(FakeTimesheetSource::default());
        let leaves = Arc::new(FakeLeaveSource::default());
        let calculator = Arc::new(FakeCalculator::default());
        let payslips = Arc::new(FakePayslipStore::default());
        let pdf = Arc::new(FakePdfRenderer::default());
        let notifier = Arc::new(FakeNotifier::default());
        let audit = Arc::new(FakeAuditSink::default());

        let stores = PayrollStores {
            periods: periods.clone(),
            runs: run_log.clone(),
            metrics: metric_store.clone(),
        };
        let collaborators = Collaborators {
            timesheets: timesheets.clone(),
            leaves: leaves.clone(),
            calculator: calculator.clone(),
            payslips: payslips.clone(),
            pdf: pdf.clone(),
            notifier: notifier.clone(),
            employment: directory.clone(),
            audit: audit.clone(),
        };

        let orchestrator = Arc::new(PayrollOrchestrator::new(stores, collaborators, config));
        let bulk = BulkOperations::new(orchestrator.clone());

        Self {
            periods,
            runs,
            metrics,
            run_log,
            metric_store,
            directory,
            timesheets,
            leaves,
            calculator,
            payslips,
            pdf,
            notifier,
            audit,
            orchestrator,
            bulk,
        }
    }

    pub fn aggregator(&self) -> MetricsAggregator {
        MetricsAggregator::new(
            self.metric_store.clone(),
            self.run_log.clone(),
            MetricsConfig::default(),
        )
    }

    pub fn add_employees(&self, user_ids: &[i64]) {
        self.directory.add(COUNTRY_ID, user_ids);
    }

    pub async fn period(&self, status: PeriodStatus) -> PayrollPeriod {
        self.periods
            .insert(
                NewPayrollPeriod::new(
                    COUNTRY_ID,
                    "January 2024",
                    date(2024, 1, 1),
                    date(2024, 1, 31),
                )
                .with_pay_date(date(2024, 2, 5))
                .with_status(status),
            )
            .await
            .expect("insert period")
    }

    pub async fn open_period(&self) -> PayrollPeriod {
        self.period(PeriodStatus::Open).await
    }

    pub async fn period_status(&self, period_id: i64) -> PeriodStatus {
        self.periods
            .get(period_id)
            .await
            .expect("period exists")
            .status
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Wait for the completion event of `run_id`
pub async fn wait_for_completion(
    completions: &mut broadcast::Receiver<RunCompletion>,
    run_id: i64,
) -> RunCompletion {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match completions.recv().await {
                Ok(completion) if completion.run_id == run_id => return completion,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("completion channel closed"),
            }
        }
    })
    .await
    .expect("run did not finish in time")
}

/// Poll `condition` until it holds
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
