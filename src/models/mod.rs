//! # Data Models
//!
//! Domain records for payroll periods, processing runs and metrics, plus the
//! shapes exchanged with external collaborators. Each persisted model has a
//! raw `*Row` counterpart (`sqlx::FromRow`) whose text status columns are
//! parsed into typed enums on conversion.

pub mod metric;
pub mod payroll_inputs;
pub mod payroll_period;
pub mod processing_run;

pub use metric::{Metric, MetricPayload, MetricQuery, MetricType, MetricUnit, NewMetric};
pub use payroll_inputs::{
    AuditEntry, CalculationRequest, CalculationResult, EmploymentFilter, EmploymentRecord,
    LeaveRecord, Payslip, PayslipStatus, Timesheet,
};
pub use payroll_period::{NewPayrollPeriod, PayrollPeriod};
pub use processing_run::{
    EmployeeFailure, EmployeeStage, ErrorDetails, NewProcessingRun, PipelineStage,
    ProcessingRun, RunMetadata, RunPatch, RunStats, RunTimings, RunTransition, RunWindowCounts,
};
