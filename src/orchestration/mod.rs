//! # Orchestration
//!
//! Drives processing runs for payroll periods.
//!
//! - [`PayrollOrchestrator`] - start/stop/retry/status entry points
//! - [`BulkOperations`] - per-item isolated multi-period process/close/open/validate
//! - [`PipelineWorker`] - supervised background executor for run pipelines
//! - [`pipeline`] - the staged per-run work itself
//! - [`collaborators`] - interfaces to the external services the pipeline drives

pub mod bulk_operations;
pub mod cancellation;
pub mod collaborators;
pub mod context;
pub mod period_locks;
pub mod pipeline;
pub mod run_orchestrator;
pub mod types;
pub mod worker;

pub use bulk_operations::BulkOperations;
pub use cancellation::CancellationRegistry;
pub use collaborators::{
    AuditSink, Collaborators, EmploymentDirectory, LeaveSource, Notifier, PayrollCalculator,
    PayslipStore, PdfRenderer, TimesheetSource,
};
pub use context::{OrchestrationContext, PayrollStores};
pub use period_locks::{PeriodGuard, PeriodLocks};
pub use pipeline::{PipelineFailure, PipelineOutcome, RunJob};
pub use run_orchestrator::PayrollOrchestrator;
pub use types::{
    BulkItemResult, BulkOperationResult, RunCompletion, RunStatusReport, StartRunResult,
    ValidationReport,
};
pub use worker::PipelineWorker;
