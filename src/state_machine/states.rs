use serde::{Deserialize, Serialize};
use std::fmt;

/// Payroll period lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Created by period administration, not yet accepting runs
    Draft,
    /// Ready for a processing run
    Open,
    /// A run is active, or the last run left failed employees behind
    Processing,
    /// Last run finished with zero failed employees
    Completed,
    /// Locked; no further processing
    Closed,
}

impl PeriodStatus {
    pub const ALL: [PeriodStatus; 5] = [
        Self::Draft,
        Self::Open,
        Self::Processing,
        Self::Completed,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Closed => "closed",
        }
    }

    /// Whether a run may be started against a period in this status
    pub fn accepts_runs(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PeriodStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "open" => Ok(Self::Open),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid payroll period status: {s}")),
        }
    }
}

impl Default for PeriodStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// Processing run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run row created, pipeline not yet picked up
    Started,
    /// Pipeline executing
    InProgress,
    /// Pipeline ran to the end (individual employees may still have failed)
    Completed,
    /// Pipeline aborted by an infrastructure failure
    Failed,
    /// Stopped by an operator
    Cancelled,
}

impl RunStatus {
    pub const ACTIVE: [RunStatus; 2] = [Self::Started, Self::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Active runs hold the per-period exclusion slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::InProgress)
    }

    /// Runs in these states may have their failed employees retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid processing run status: {s}")),
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Started
    }
}
