use super::{status_list, ACTIVE_RUN_INDEX};
use crate::constants::entity_types::PROCESSING_RUN;
use crate::error::{PayrollError, Result};
use crate::models::processing_run::ProcessingRunRow;
use crate::models::{
    NewProcessingRun, ProcessingRun, RunPatch, RunStats, RunTransition, RunWindowCounts,
};
use crate::repositories::RunLogRepository;
use crate::state_machine::{RunStateMachine, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

const RUN_COLUMNS: &str = "id, country_id, period_id, status, started_at, completed_at, \
     employees_processed, employees_failed, error_message, error_details, metadata, \
     started_by, updated_at";

#[derive(Clone)]
pub struct PgRunLogRepository {
    pool: PgPool,
}

impl PgRunLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn active_statuses() -> Vec<String> {
        status_list(&RunStatus::ACTIVE)
    }
}

impl std::fmt::Debug for PgRunLogRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRunLogRepository")
            .field("pool", &"PgPool")
            .finish()
    }
}

#[async_trait]
impl RunLogRepository for PgRunLogRepository {
    async fn create_exclusive(&self, new_run: NewProcessingRun) -> Result<ProcessingRun> {
        let result = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            INSERT INTO processing_runs (country_id, period_id, status, metadata, started_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(new_run.country_id)
        .bind(new_run.period_id)
        .bind(RunStatus::Started.as_str())
        .bind(Json(&new_run.metadata))
        .bind(new_run.started_by)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(ACTIVE_RUN_INDEX) =>
            {
                debug!(period_id = ?new_run.period_id, "Active run index rejected insert");
                Err(PayrollError::Conflict(format!(
                    "period {} already has an active run",
                    new_run.period_id.unwrap_or_default()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ProcessingRun>> {
        let row = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM processing_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProcessingRun::try_from).transpose()
    }

    async fn update(&self, id: i64, patch: RunPatch) -> Result<ProcessingRun> {
        let row = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            UPDATE processing_runs
            SET metadata = COALESCE($2, metadata),
                error_message = COALESCE($3, error_message),
                error_details = COALESCE($4, error_details),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.metadata.map(Json))
        .bind(patch.error_message)
        .bind(patch.error_details.map(Json))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| PayrollError::not_found(PROCESSING_RUN, id))?
            .try_into()
    }

    async fn transition(&self, id: i64, transition: RunTransition) -> Result<ProcessingRun> {
        let target = RunStateMachine::destination(transition.event);
        let sources = status_list(RunStateMachine::allowed_sources(transition.event));
        let finishes = transition.finishes_run();

        let updated = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            UPDATE processing_runs
            SET status = $2,
                employees_processed = COALESCE($3, employees_processed),
                employees_failed = COALESCE($4, employees_failed),
                error_message = COALESCE($5, error_message),
                error_details = COALESCE($6, error_details),
                metadata = COALESCE($7, metadata),
                completed_at = CASE WHEN $8 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($9)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(target.as_str())
        .bind(transition.employees_processed)
        .bind(transition.employees_failed)
        .bind(transition.error_message)
        .bind(transition.error_details.map(Json))
        .bind(transition.metadata.map(Json))
        .bind(finishes)
        .bind(sources)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.get(id).await?;
                // Surface the state machine's own error for the observed status
                RunStateMachine::target_state(current.status, transition.event)?;
                Err(PayrollError::Conflict(format!(
                    "processing run {id} changed concurrently"
                )))
            }
        }
    }

    async fn update_progress(&self, id: i64, processed: i32, failed: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_runs
            SET employees_processed = GREATEST(employees_processed, $2),
                employees_failed = GREATEST(employees_failed, $3),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(processed)
        .bind(failed)
        .bind(Self::active_statuses())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_country(&self, country_id: i64, limit: usize) -> Result<Vec<ProcessingRun>> {
        let rows = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM processing_runs
            WHERE country_id = $1
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(country_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProcessingRun::try_from).collect()
    }

    async fn list_by_period(&self, period_id: i64) -> Result<Vec<ProcessingRun>> {
        let rows = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM processing_runs
            WHERE period_id = $1
            ORDER BY started_at DESC, id DESC
            "#
        ))
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProcessingRun::try_from).collect()
    }

    async fn latest_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        let row = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM processing_runs
            WHERE period_id = $1
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProcessingRun::try_from).transpose()
    }

    async fn active_for_period(&self, period_id: i64) -> Result<Option<ProcessingRun>> {
        let row = sqlx::query_as::<_, ProcessingRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM processing_runs
            WHERE period_id = $1 AND status = ANY($2)
            LIMIT 1
            "#
        ))
        .bind(period_id)
        .bind(Self::active_statuses())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProcessingRun::try_from).transpose()
    }

    async fn stats_for_country(&self, country_id: i64) -> Result<RunStats> {
        let stats = sqlx::query_as::<_, RunStats>(
            r#"
            SELECT COUNT(*)::BIGINT AS total,
                   COUNT(*) FILTER (WHERE status = 'completed')::BIGINT AS completed,
                   COUNT(*) FILTER (WHERE status = 'failed')::BIGINT AS failed,
                   COUNT(*) FILTER (WHERE status IN ('started', 'in_progress'))::BIGINT AS in_progress
            FROM processing_runs
            WHERE country_id = $1
            "#,
        )
        .bind(country_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn count_active(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::BIGINT FROM processing_runs WHERE status = ANY($1)",
        )
        .bind(Self::active_statuses())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn window_counts(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<RunWindowCounts> {
        let counts = sqlx::query_as::<_, RunWindowCounts>(
            r#"
            SELECT COUNT(*)::BIGINT AS total,
                   COUNT(*) FILTER (WHERE status = 'completed')::BIGINT AS completed
            FROM processing_runs
            WHERE started_at >= $1 AND started_at <= $2
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }
}
