use crate::error::{PayrollError, Result};
use crate::models::metric::MetricRow;
use crate::models::{Metric, MetricQuery, MetricType, NewMetric};
use crate::repositories::{MetricRepository, TypeAverage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

const METRIC_COLUMNS: &str = "id, metric_type, name, value, unit, period_id, run_id, user_id, \
     country_id, additional_data, recorded_at";

#[derive(Debug, FromRow)]
struct TypeAverageRow {
    metric_type: String,
    average: f64,
    count: i64,
}

impl TryFrom<TypeAverageRow> for TypeAverage {
    type Error = PayrollError;

    fn try_from(row: TypeAverageRow) -> Result<Self> {
        Ok(TypeAverage {
            metric_type: row.metric_type.parse().map_err(PayrollError::Database)?,
            average: row.average,
            count: row.count,
        })
    }
}

#[derive(Clone)]
pub struct PgMetricRepository {
    pool: PgPool,
}

impl PgMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append `WHERE ...` for every filter set on `query`
    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a MetricQuery) {
        builder.push(" WHERE TRUE");
        if let Some(metric_type) = query.metric_type {
            builder
                .push(" AND metric_type = ")
                .push_bind(metric_type.as_str());
        }
        if let Some(period_id) = query.period_id {
            builder.push(" AND period_id = ").push_bind(period_id);
        }
        if let Some(run_id) = query.run_id {
            builder.push(" AND run_id = ").push_bind(run_id);
        }
        if let Some(country_id) = query.country_id {
            builder.push(" AND country_id = ").push_bind(country_id);
        }
        if let Some(user_id) = query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(from) = query.from {
            builder.push(" AND recorded_at >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND recorded_at <= ").push_bind(to);
        }
    }
}

impl std::fmt::Debug for PgMetricRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMetricRepository")
            .field("pool", &"PgPool")
            .finish()
    }
}

async fn insert_one<'e, E>(executor: E, metric: &NewMetric) -> Result<MetricRow>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, MetricRow>(&format!(
        r#"
        INSERT INTO payroll_metrics
            (metric_type, name, value, unit, period_id, run_id, user_id, country_id,
             additional_data, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, NOW()))
        RETURNING {METRIC_COLUMNS}
        "#
    ))
    .bind(metric.metric_type.as_str())
    .bind(&metric.name)
    .bind(metric.value)
    .bind(metric.unit.as_str())
    .bind(metric.period_id)
    .bind(metric.run_id)
    .bind(metric.user_id)
    .bind(metric.country_id)
    .bind(metric.additional_data.as_ref().map(Json))
    .bind(metric.recorded_at)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

#[async_trait]
impl MetricRepository for PgMetricRepository {
    async fn insert(&self, metric: NewMetric) -> Result<Metric> {
        insert_one(&self.pool, &metric).await?.try_into()
    }

    async fn insert_batch(&self, metrics: Vec<NewMetric>) -> Result<usize> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for metric in &metrics {
            insert_one(&mut *tx, metric).await?;
        }
        tx.commit().await?;

        Ok(metrics.len())
    }

    async fn query(&self, query: &MetricQuery, limit: usize) -> Result<Vec<Metric>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {METRIC_COLUMNS} FROM payroll_metrics"));
        Self::push_filters(&mut builder, query);
        builder
            .push(" ORDER BY recorded_at DESC, id DESC LIMIT ")
            .push_bind(limit as i64);

        let rows = builder
            .build_query_as::<MetricRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Metric::try_from).collect()
    }

    async fn values(
        &self,
        metric_type: MetricType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<f64>> {
        let values = sqlx::query_scalar::<_, f64>(
            r#"
            SELECT value FROM payroll_metrics
            WHERE metric_type = $1
              AND ($2::TIMESTAMPTZ IS NULL OR recorded_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR recorded_at <= $3)
            "#,
        )
        .bind(metric_type.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(values)
    }

    async fn averages_by_type(&self, query: &MetricQuery) -> Result<Vec<TypeAverage>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT metric_type, AVG(value)::DOUBLE PRECISION AS average, COUNT(*)::BIGINT AS count \
             FROM payroll_metrics",
        );
        Self::push_filters(&mut builder, query);
        builder.push(" GROUP BY metric_type ORDER BY metric_type");

        let rows = builder
            .build_query_as::<TypeAverageRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TypeAverage::try_from).collect()
    }
}
