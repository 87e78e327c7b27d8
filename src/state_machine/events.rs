use serde::{Deserialize, Serialize};

/// Events that drive processing run transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    /// Pipeline picked the run up
    Begin,
    /// Pipeline reached finalization
    Complete,
    /// Infrastructure failure aborted the pipeline
    Fail,
    /// Operator stop
    Cancel,
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }
}

/// Events that drive payroll period status changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodEvent {
    /// A run was accepted for the period
    BeginProcessing,
    /// A run finished with zero failed employees
    CompleteProcessing,
    /// The active run was stopped
    RevertToOpen,
    /// Period locked by an administrator
    Close,
    /// Period (re)opened by an administrator
    Open,
}

impl PeriodEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BeginProcessing => "begin_processing",
            Self::CompleteProcessing => "complete_processing",
            Self::RevertToOpen => "revert_to_open",
            Self::Close => "close",
            Self::Open => "open",
        }
    }
}
