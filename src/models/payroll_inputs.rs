//! Records exchanged with the external collaborators the pipeline drives:
//! employment directory, timesheet/leave sources, calculator and payslip store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmploymentRecord {
    pub id: i64,
    pub user_id: i64,
    pub country_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentFilter {
    pub country_id: i64,
    pub active_only: bool,
}

impl EmploymentFilter {
    pub fn active_in_country(country_id: i64) -> Self {
        Self {
            country_id,
            active_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timesheet {
    pub id: i64,
    pub user_id: i64,
    pub period_id: i64,
    pub regular_hours: f64,
    pub overtime_hours: f64,
    pub night_shift_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRecord {
    pub id: i64,
    pub user_id: i64,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub user_id: i64,
    pub country_id: i64,
    pub period_id: i64,
    pub include_overtime: bool,
    pub include_night_shift: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub user_id: i64,
    pub period_id: i64,
    pub gross_amount: f64,
    pub net_amount: f64,
    /// Component breakdown owned by the calculator
    #[serde(default)]
    pub breakdown: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayslipStatus {
    Draft,
    Available,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payslip {
    pub id: i64,
    pub user_id: i64,
    pub period_id: i64,
    pub net_amount: f64,
    pub status: PayslipStatus,
}

/// Compliance trail entry for start/stop/retry/bulk actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor_id: i64, action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            actor_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            details: Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
