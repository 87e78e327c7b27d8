//! # Payroll Period Model
//!
//! A calendar span for which payroll is computed for one country. Periods are
//! created by period administration; this crate only reads them and moves
//! their status through compare-and-set writes.
//!
//! ## Database Schema
//!
//! Maps to `payroll_periods`:
//! - `id`: Primary key (BIGSERIAL)
//! - `country_id`: Owning country (BIGINT)
//! - `status`: `draft | open | processing | completed | closed` (TEXT)
//! - `start_date`, `end_date`, `pay_date`: DATE

use crate::error::PayrollError;
use crate::state_machine::PeriodStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollPeriod {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub status: PeriodStatus,
    pub total_employees: i32,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayrollPeriod {
    /// Whether the period's end date is still ahead of `today`
    pub fn ends_after(&self, today: NaiveDate) -> bool {
        self.end_date > today
    }
}

/// New period for insertion (period administration and test fixtures)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayrollPeriod {
    pub country_id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub status: PeriodStatus,
}

impl NewPayrollPeriod {
    pub fn new(country_id: i64, name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            country_id,
            name: name.into(),
            start_date,
            end_date,
            pay_date: end_date,
            status: PeriodStatus::Draft,
        }
    }

    pub fn with_status(mut self, status: PeriodStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_pay_date(mut self, pay_date: NaiveDate) -> Self {
        self.pay_date = pay_date;
        self
    }
}

/// Raw `payroll_periods` row; status is stored as text
#[derive(Debug, Clone, FromRow)]
pub struct PayrollPeriodRow {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub status: String,
    pub total_employees: i32,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PayrollPeriodRow> for PayrollPeriod {
    type Error = PayrollError;

    fn try_from(row: PayrollPeriodRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(PayrollError::Database)?;
        Ok(PayrollPeriod {
            id: row.id,
            country_id: row.country_id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            pay_date: row.pay_date,
            status,
            total_employees: row.total_employees,
            total_amount: row.total_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
