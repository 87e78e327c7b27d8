mod common;

use common::{eventually, wait_for_completion, TestHarness, ACTOR_ID};
use payroll_run_core::config::OrchestrationConfig;
use payroll_run_core::error::{ErrorKind, PayrollError};
use payroll_run_core::models::{EmployeeStage, MetricPayload, MetricType, PipelineStage};
use payroll_run_core::repositories::RunLogRepository;
use payroll_run_core::state_machine::{PeriodStatus, RunStatus};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_clean_run_completes_period() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    assert_eq!(started.employee_count, 3);

    let done = wait_for_completion(&mut completions, started.run_id).await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.employees_processed, 3);
    assert_eq!(done.employees_failed, 0);

    assert_eq!(h.period_status(period.id).await, PeriodStatus::Completed);
    assert_eq!(h.payslips.available_users(), vec![1, 2, 3]);
    assert_eq!(h.notifier.notified.lock().len(), 3);

    let run = h.runs.get(started.run_id).await.unwrap();
    assert!(run.completed_at.is_some());
    assert!(run.metadata.failed_employees.is_empty());
    assert!(run.metadata.timings.is_some());
    assert_eq!(run.started_by, Some(ACTOR_ID));

    let recorded: Vec<MetricType> = h.metrics.all().iter().map(|m| m.metric_type).collect();
    for expected in [
        MetricType::TimesheetFetch,
        MetricType::LeaveFetch,
        MetricType::CalculationTime,
        MetricType::PayslipStorage,
        MetricType::PdfGeneration,
        MetricType::NotificationSend,
        MetricType::ProcessingTime,
    ] {
        assert!(recorded.contains(&expected), "missing {expected} metric");
    }
    assert!(h
        .metrics
        .all()
        .iter()
        .all(|metric| metric.run_id == Some(started.run_id)));

    assert!(h.audit.actions().contains(&"payroll.run.started".to_string()));
}

#[tokio::test]
async fn test_one_failing_employee_leaves_period_processing() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    h.calculator.plan.fail_for(2);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.employees_processed, 3);
    assert_eq!(done.employees_failed, 1);
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Processing);

    let run = h.runs.get(started.run_id).await.unwrap();
    assert_eq!(run.success_employees(), 2);
    assert_eq!(run.failed_employee_ids(), vec![2]);
    assert_eq!(
        run.metadata.failed_employees[0].stage,
        EmployeeStage::Calculation
    );
    assert!(run.metadata.failed_employees[0]
        .error
        .contains("calculation failed for user 2"));
    assert_eq!(h.payslips.available_users(), vec![1, 3]);
}

#[tokio::test]
async fn test_start_requires_open_period() {
    let h = TestHarness::new();
    h.add_employees(&[1]);

    for status in [
        PeriodStatus::Draft,
        PeriodStatus::Processing,
        PeriodStatus::Completed,
        PeriodStatus::Closed,
    ] {
        let period = h.period(status).await;
        let err = h
            .orchestrator
            .start(period.id, None, ACTOR_ID)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.period_status(period.id).await, status);
    }

    assert!(h.runs.all().is_empty());
}

#[tokio::test]
async fn test_start_unknown_period_is_not_found() {
    let h = TestHarness::new();
    let err = h.orchestrator.start(404, None, ACTOR_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_empty_employee_set_has_no_side_effects() {
    let h = TestHarness::new();
    let period = h.open_period().await;

    let err = h
        .orchestrator
        .start(period.id, None, ACTOR_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PayrollError::Validation(_)));

    let err = h
        .orchestrator
        .start(period.id, Some(Vec::new()), ACTOR_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PayrollError::Validation(_)));

    assert!(h.runs.all().is_empty());
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Open);
    assert!(h.audit.actions().is_empty());
}

#[tokio::test]
async fn test_explicit_employees_are_deduplicated() {
    let h = TestHarness::new();
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h
        .orchestrator
        .start(period.id, Some(vec![7, 8, 7]), ACTOR_ID)
        .await
        .unwrap();
    assert_eq!(started.employee_count, 2);

    wait_for_completion(&mut completions, started.run_id).await;
    let mut calculated = h.calculator.calculated_users();
    calculated.sort_unstable();
    assert_eq!(calculated, vec![7, 8]);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2]);
    h.calculator.hold();
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let first = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let err = h
        .orchestrator
        .start(period.id, None, ACTOR_ID)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let active: Vec<_> = h
        .runs
        .all()
        .into_iter()
        .filter(|run| run.status.is_active())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first.run_id);

    h.calculator.release();
    wait_for_completion(&mut completions, first.run_id).await;
}

#[tokio::test]
async fn test_concurrent_starts_create_one_run() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2]);
    h.calculator.hold();
    let period = h.open_period().await;

    let (a, b) = tokio::join!(
        h.orchestrator.start(period.id, None, ACTOR_ID),
        h.orchestrator.start(period.id, None, ACTOR_ID + 1),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(h.runs.all().len(), 1);

    h.calculator.release();
}

#[tokio::test]
async fn test_retry_without_failures_is_rejected() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2]);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    wait_for_completion(&mut completions, started.run_id).await;

    let err = h
        .orchestrator
        .retry_failed_employees(started.run_id, None, ACTOR_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PayrollError::Validation(_)));
    assert_eq!(h.runs.all().len(), 1);
}

#[tokio::test]
async fn test_retry_creates_linked_run_for_failed_subset() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    h.pdf.plan.fail_for(3);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let first = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    wait_for_completion(&mut completions, first.run_id).await;
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Processing);

    h.pdf.plan.clear();
    let retry = h
        .orchestrator
        .retry_failed_employees(first.run_id, None, ACTOR_ID)
        .await
        .unwrap();
    assert_ne!(retry.run_id, first.run_id);
    assert_eq!(retry.employee_count, 1);

    let done = wait_for_completion(&mut completions, retry.run_id).await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.employees_failed, 0);

    let retry_run = h.runs.get(retry.run_id).await.unwrap();
    assert_eq!(retry_run.metadata.retry_of_run_id, Some(first.run_id));
    assert_eq!(retry_run.metadata.employee_ids, vec![3]);
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Completed);

    // The original run is untouched
    let original = h.runs.get(first.run_id).await.unwrap();
    assert_eq!(original.employees_failed, 1);

    let actions = h.audit.actions();
    assert!(actions.contains(&"payroll.run.retried".to_string()));
    assert_eq!(h.orchestrator.run_history(period.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_retry_rejects_active_run() {
    let h = TestHarness::new();
    h.add_employees(&[1]);
    h.calculator.hold();
    let period = h.open_period().await;

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let err = h
        .orchestrator
        .retry_failed_employees(started.run_id, Some(vec![1]), ACTOR_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PayrollError::Validation(_)));

    h.calculator.release();
}

#[tokio::test]
async fn test_stop_cancels_and_reopens_period() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    h.calculator.hold();
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let calculator = h.calculator.clone();
    eventually(|| calculator.entered.load(Ordering::SeqCst) >= 1).await;

    let stopped = h.orchestrator.stop(started.run_id, ACTOR_ID).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Cancelled);
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Open);

    h.calculator.release();
    let done = wait_for_completion(&mut completions, started.run_id).await;
    assert_eq!(done.status, RunStatus::Cancelled);

    // Cancelled is terminal
    let run = h.runs.get(started.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.employees_processed < 3);
    assert!(h.payslips.available_users().is_empty());

    let err = h.orchestrator.stop(started.run_id, ACTOR_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.audit.actions().contains(&"payroll.run.stopped".to_string()));

    // The period can be processed again
    let again = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    wait_for_completion(&mut completions, again.run_id).await;
}

#[tokio::test]
async fn test_infrastructure_failure_fails_run() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2]);
    h.timesheets.unavailable.store(true, Ordering::SeqCst);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;
    assert_eq!(done.status, RunStatus::Failed);

    let run = h.runs.get(started.run_id).await.unwrap();
    let details = run.error_details.expect("error details recorded");
    assert_eq!(details.kind, "collaborator");
    assert_eq!(details.stage, Some(PipelineStage::TimesheetFetch));
    assert!(run
        .error_message
        .unwrap_or_default()
        .contains("timesheet service timed out"));

    assert_eq!(h.period_status(period.id).await, PeriodStatus::Processing);
    assert!(h.calculator.calculated_users().is_empty());
}

#[tokio::test]
async fn test_finalization_failure_fails_run() {
    let h = TestHarness::new();
    h.add_employees(&[1]);
    h.payslips.fail_mark_available.store(true, Ordering::SeqCst);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;
    assert_eq!(done.status, RunStatus::Failed);

    let run = h.runs.get(started.run_id).await.unwrap();
    assert_eq!(
        run.error_details.unwrap().stage,
        Some(PipelineStage::Finalization)
    );
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Processing);
}

#[tokio::test]
async fn test_panicking_employee_is_isolated() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    h.calculator.plan.panic_for(1);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.employees_processed, 3);
    assert_eq!(done.employees_failed, 1);

    let run = h.runs.get(started.run_id).await.unwrap();
    assert!(run.metadata.failed_employees[0].error.starts_with("panic:"));
}

#[tokio::test]
async fn test_notification_failures_are_swallowed() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3]);
    h.notifier.plan.fail_for(1);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.employees_failed, 0);
    assert_eq!(h.period_status(period.id).await, PeriodStatus::Completed);

    let notification = h
        .metrics
        .all()
        .into_iter()
        .find(|metric| metric.metric_type == MetricType::NotificationSend)
        .expect("notification metric");
    assert_eq!(
        notification.additional_data,
        Some(MetricPayload::Notification {
            attempted: 3,
            sent: 2
        })
    );
}

#[tokio::test]
async fn test_audit_outage_does_not_block_start() {
    let h = TestHarness::new();
    h.add_employees(&[1]);
    h.audit.unavailable.store(true, Ordering::SeqCst);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;
    assert_eq!(done.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_get_status_reports_progress() {
    let h = TestHarness::new();
    h.add_employees(&[1, 2, 3, 4]);
    h.calculator.plan.fail_for(4);
    let period = h.open_period().await;

    let before = h.orchestrator.get_status(period.id).await.unwrap();
    assert!(!before.has_run());

    let mut completions = h.orchestrator.subscribe();
    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    wait_for_completion(&mut completions, started.run_id).await;

    let report = h.orchestrator.get_status(period.id).await.unwrap();
    assert_eq!(report.run.as_ref().unwrap().id, started.run_id);
    assert_eq!(report.success_employees, 3);
    assert_eq!(report.total_employees, 4);
    assert_eq!(report.progress_percent, 100.0);

    let err = h.orchestrator.get_status(999).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_bounded_parallel_employees_keep_counters_consistent() {
    let h = TestHarness::with_config(OrchestrationConfig {
        max_concurrent_employees: 4,
        ..OrchestrationConfig::default()
    });
    let employees: Vec<i64> = (1..=10).collect();
    h.add_employees(&employees);
    for user_id in [2, 5, 9] {
        h.calculator.plan.fail_for(user_id);
    }
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    let done = wait_for_completion(&mut completions, started.run_id).await;

    assert_eq!(done.employees_processed, 10);
    assert_eq!(done.employees_failed, 3);
    let run = h.runs.get(started.run_id).await.unwrap();
    assert!(run.employees_failed <= run.employees_processed);
    assert!(run.employees_processed as u32 <= run.total_employees());

    let mut failed = run.failed_employee_ids();
    failed.sort_unstable();
    assert_eq!(failed, vec![2, 5, 9]);
}

#[tokio::test]
async fn test_calculation_flags_come_from_config() {
    let h = TestHarness::with_config(OrchestrationConfig {
        include_overtime: false,
        ..OrchestrationConfig::default()
    });
    h.add_employees(&[1]);
    let period = h.open_period().await;
    let mut completions = h.orchestrator.subscribe();

    let started = h.orchestrator.start(period.id, None, ACTOR_ID).await.unwrap();
    wait_for_completion(&mut completions, started.run_id).await;

    let requests = h.calculator.requests.lock().clone();
    assert!(!requests[0].include_overtime);
    assert!(requests[0].include_night_shift);
    assert_eq!(requests[0].period_id, period.id);
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_run_and_rejects_new_starts() {
    let h = TestHarness::with_config(OrchestrationConfig {
        shutdown_grace_seconds: 2,
        ..OrchestrationConfig::default()
    });
    h.add_employees(&[1, 2]);
    h.calculator.hold();
    let first_period = h.open_period().await;
    let second_period = h.open_period().await;

    let started = h
        .orchestrator
        .start(first_period.id, None, ACTOR_ID)
        .await
        .unwrap();
    let calculator = h.calculator.clone();
    eventually(|| calculator.entered.load(Ordering::SeqCst) >= 1).await;

    h.orchestrator.shutdown().await;

    let run = h.runs.get(started.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_details.unwrap().kind, "shutdown");

    let err = h
        .orchestrator
        .start(second_period.id, None, ACTOR_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PayrollError::Internal(_)));
    assert_eq!(h.period_status(second_period.id).await, PeriodStatus::Open);
    assert!(h
        .runs
        .list_by_period(second_period.id)
        .await
        .unwrap()
        .iter()
        .all(|run| run.status == RunStatus::Failed));
}
