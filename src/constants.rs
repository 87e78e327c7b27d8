//! # Constants
//!
//! Audit action names, audited entity types and collaborator labels shared by
//! the orchestrator, bulk operations and the pipeline.

/// Actions written to the compliance audit trail
pub mod audit_actions {
    pub const RUN_STARTED: &str = "payroll.run.started";
    pub const RUN_STOPPED: &str = "payroll.run.stopped";
    pub const RUN_RETRIED: &str = "payroll.run.retried";
    pub const BULK_PROCESS: &str = "payroll.bulk.process";
    pub const PERIOD_CLOSED: &str = "payroll.period.closed";
    pub const PERIOD_OPENED: &str = "payroll.period.opened";
}

/// Entity types referenced by audit entries and not-found errors
pub mod entity_types {
    pub const PAYROLL_PERIOD: &str = "payroll_period";
    pub const PROCESSING_RUN: &str = "processing_run";
}

/// Names used when wrapping collaborator errors
pub mod collaborators {
    pub const TIMESHEET_SOURCE: &str = "timesheet_source";
    pub const LEAVE_SOURCE: &str = "leave_source";
    pub const CALCULATOR: &str = "payroll_calculator";
    pub const PAYSLIP_STORE: &str = "payslip_store";
    pub const PDF_RENDERER: &str = "pdf_renderer";
    pub const NOTIFIER: &str = "notifier";
    pub const EMPLOYMENT_DIRECTORY: &str = "employment_directory";
    pub const AUDIT_SINK: &str = "audit_sink";
}

/// Metric names written by the pipeline
pub mod metric_names {
    pub const TIMESHEET_FETCH: &str = "timesheet_fetch";
    pub const LEAVE_FETCH: &str = "leave_fetch";
    pub const AVERAGE_CALCULATION: &str = "average_calculation_time";
    pub const AVERAGE_PAYSLIP_STORAGE: &str = "average_payslip_storage_time";
    pub const AVERAGE_PDF_GENERATION: &str = "average_pdf_generation_time";
    pub const NOTIFICATION_SEND: &str = "notification_send";
    pub const RUN_PROCESSING: &str = "run_processing_time";
}
