//! Repository for the definition columns of `metrics` and `experiments`.

use sqlx::PgPool;

use crate::models::definition::{ExperimentDefinition, MetricDefinition};

const METRIC_COLUMNS: &str = "\
    id, organization, datasource, name, type, sql, table_name, column_name, \
    user_id_column, timestamp_column, cap, ignore_nulls, segment";

const EXPERIMENT_COLUMNS: &str = "\
    id, organization, datasource, name, tracking_key, metric_id, start_date, end_date";

/// Provides read and upsert operations for metric and experiment definitions.
pub struct DefinitionRepo;

impl DefinitionRepo {
    pub async fn find_metric(
        pool: &PgPool,
        id: &str,
        organization: &str,
    ) -> Result<Option<MetricDefinition>, sqlx::Error> {
        let query =
            format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE id = $1 AND organization = $2");
        sqlx::query_as::<_, MetricDefinition>(&query)
            .bind(id)
            .bind(organization)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_experiment(
        pool: &PgPool,
        id: &str,
        organization: &str,
    ) -> Result<Option<ExperimentDefinition>, sqlx::Error> {
        let query = format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = $1 AND organization = $2"
        );
        sqlx::query_as::<_, ExperimentDefinition>(&query)
            .bind(id)
            .bind(organization)
            .fetch_optional(pool)
            .await
    }

    /// Insert or update a metric definition. Result columns are untouched.
    pub async fn upsert_metric(
        pool: &PgPool,
        metric: &MetricDefinition,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO metrics (id, organization, datasource, name, type, sql, table_name, \
                 column_name, user_id_column, timestamp_column, cap, ignore_nulls, segment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id, organization) DO UPDATE SET \
                 datasource = EXCLUDED.datasource, \
                 name = EXCLUDED.name, \
                 type = EXCLUDED.type, \
                 sql = EXCLUDED.sql, \
                 table_name = EXCLUDED.table_name, \
                 column_name = EXCLUDED.column_name, \
                 user_id_column = EXCLUDED.user_id_column, \
                 timestamp_column = EXCLUDED.timestamp_column, \
                 cap = EXCLUDED.cap, \
                 ignore_nulls = EXCLUDED.ignore_nulls, \
                 segment = EXCLUDED.segment",
        )
        .bind(&metric.id)
        .bind(&metric.organization)
        .bind(&metric.datasource)
        .bind(&metric.name)
        .bind(metric.metric_type.as_str())
        .bind(&metric.sql)
        .bind(&metric.table)
        .bind(&metric.column)
        .bind(&metric.user_id_column)
        .bind(&metric.timestamp_column)
        .bind(metric.cap)
        .bind(metric.ignore_nulls)
        .bind(&metric.segment)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Insert or update an experiment definition. Result columns are untouched.
    pub async fn upsert_experiment(
        pool: &PgPool,
        experiment: &ExperimentDefinition,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO experiments (id, organization, datasource, name, tracking_key, \
                 metric_id, start_date, end_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id, organization) DO UPDATE SET \
                 datasource = EXCLUDED.datasource, \
                 name = EXCLUDED.name, \
                 tracking_key = EXCLUDED.tracking_key, \
                 metric_id = EXCLUDED.metric_id, \
                 start_date = EXCLUDED.start_date, \
                 end_date = EXCLUDED.end_date",
        )
        .bind(&experiment.id)
        .bind(&experiment.organization)
        .bind(&experiment.datasource)
        .bind(&experiment.name)
        .bind(&experiment.tracking_key)
        .bind(&experiment.metric_id)
        .bind(experiment.start_date)
        .bind(experiment.end_date)
        .execute(pool)
        .await?;
        Ok(())
    }
}
