use super::status_list;
use crate::constants::entity_types::PAYROLL_PERIOD;
use crate::error::{PayrollError, Result};
use crate::models::payroll_period::PayrollPeriodRow;
use crate::models::{NewPayrollPeriod, PayrollPeriod};
use crate::repositories::PeriodRepository;
use crate::state_machine::PeriodStatus;
use async_trait::async_trait;
use sqlx::PgPool;

const PERIOD_COLUMNS: &str = "id, country_id, name, start_date, end_date, pay_date, status, \
     total_employees, total_amount, created_at, updated_at";

#[derive(Clone)]
pub struct PgPeriodRepository {
    pool: PgPool,
}

impl PgPeriodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for PgPeriodRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPeriodRepository")
            .field("pool", &"PgPool")
            .finish()
    }
}

#[async_trait]
impl PeriodRepository for PgPeriodRepository {
    async fn insert(&self, period: NewPayrollPeriod) -> Result<PayrollPeriod> {
        let row = sqlx::query_as::<_, PayrollPeriodRow>(&format!(
            r#"
            INSERT INTO payroll_periods (country_id, name, start_date, end_date, pay_date, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PERIOD_COLUMNS}
            "#
        ))
        .bind(period.country_id)
        .bind(&period.name)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.pay_date)
        .bind(period.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<PayrollPeriod>> {
        let row = sqlx::query_as::<_, PayrollPeriodRow>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM payroll_periods WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PayrollPeriod::try_from).transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: &[PeriodStatus],
        new_status: PeriodStatus,
    ) -> Result<PayrollPeriod> {
        let updated = sqlx::query_as::<_, PayrollPeriodRow>(&format!(
            r#"
            UPDATE payroll_periods
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {PERIOD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_status.as_str())
        .bind(status_list(expected))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                // Distinguish a missing row from a lost compare-and-set
                let current = self.get(id).await?;
                Err(PayrollError::InvalidTransition {
                    entity: PAYROLL_PERIOD,
                    from: current.status.to_string(),
                    to: new_status.to_string(),
                })
            }
        }
    }
}
