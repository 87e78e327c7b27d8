//! # External Collaborators
//!
//! Interfaces to the services the pipeline drives. Implementations live
//! outside this crate; every method returns `anyhow::Result` and the
//! orchestrator attributes failures to the collaborator that raised them.

use crate::models::{
    AuditEntry, CalculationRequest, CalculationResult, EmploymentFilter, EmploymentRecord,
    LeaveRecord, Payslip, Timesheet,
};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait TimesheetSource: Send + Sync {
    async fn payroll_ready_timesheets(&self, period_id: i64) -> anyhow::Result<Vec<Timesheet>>;
}

#[async_trait]
pub trait LeaveSource: Send + Sync {
    async fn payroll_ready_leaves(
        &self,
        period_id: i64,
        country_id: i64,
    ) -> anyhow::Result<Vec<LeaveRecord>>;
}

/// Statutory gross-to-net calculation for one employee
#[async_trait]
pub trait PayrollCalculator: Send + Sync {
    async fn calculate(&self, request: CalculationRequest) -> anyhow::Result<CalculationResult>;
}

#[async_trait]
pub trait PayslipStore: Send + Sync {
    async fn save(&self, result: &CalculationResult) -> anyhow::Result<Payslip>;

    async fn find_by_period(&self, period_id: i64) -> anyhow::Result<Vec<Payslip>>;

    async fn mark_available(&self, payslip_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn generate(&self, payslip: &Payslip) -> anyhow::Result<()>;
}

/// Best-effort "your payslip is available" delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_available(&self, payslip: &Payslip) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EmploymentDirectory: Send + Sync {
    async fn list_active(&self, filter: EmploymentFilter) -> anyhow::Result<Vec<EmploymentRecord>>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Shared handles to every collaborator
#[derive(Clone)]
pub struct Collaborators {
    pub timesheets: Arc<dyn TimesheetSource>,
    pub leaves: Arc<dyn LeaveSource>,
    pub calculator: Arc<dyn PayrollCalculator>,
    pub payslips: Arc<dyn PayslipStore>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub notifier: Arc<dyn Notifier>,
    pub employment: Arc<dyn EmploymentDirectory>,
    pub audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
