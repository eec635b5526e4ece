//! Repository for the analysis result columns of `metrics` and `experiments`.

use abacus_core::stats::AnalysisSummary;
use abacus_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::analysis::{AnalysisColumns, AnalysisResult, AnalysisTarget, QueryRecord};

/// Column list for result reads.
const COLUMNS: &str = "run_started, analysis, analysis_error, queries";

/// Provides result-persistence operations for analysed records.
pub struct AnalysisRepo;

impl AnalysisRepo {
    /// Mark a new run as started, discarding the previous outcome.
    ///
    /// Returns the stored `run_started` (database precision), which must be
    /// passed back to [`AnalysisRepo::save_result`].
    pub async fn mark_run_started(
        pool: &PgPool,
        target: &AnalysisTarget,
        organization_id: &str,
        at: Timestamp,
    ) -> Result<Timestamp, sqlx::Error> {
        let query = format!(
            "INSERT INTO {table} (id, organization, run_started) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (id, organization) DO UPDATE SET \
                 run_started = EXCLUDED.run_started, \
                 analysis = NULL, \
                 analysis_error = NULL, \
                 queries = '[]'::jsonb \
             RETURNING run_started",
            table = target.kind.table()
        );
        sqlx::query_scalar::<_, Timestamp>(&query)
            .bind(&target.id)
            .bind(organization_id)
            .bind(at)
            .fetch_one(pool)
            .await
    }

    /// Write a run's terminal outcome.
    ///
    /// Guarded on `run_started`: returns `false` (and writes nothing) when a
    /// newer run has started since, so a slow run cannot overwrite it.
    pub async fn save_result(
        pool: &PgPool,
        target: &AnalysisTarget,
        organization_id: &str,
        run_started: Timestamp,
        analysis: Option<&AnalysisSummary>,
        analysis_error: Option<&str>,
        queries: &[QueryRecord],
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE {table} SET \
                 analysis = $4, \
                 analysis_error = $5, \
                 queries = $6 \
             WHERE id = $1 AND organization = $2 AND run_started = $3",
            table = target.kind.table()
        );
        let result = sqlx::query(&query)
            .bind(&target.id)
            .bind(organization_id)
            .bind(run_started)
            .bind(analysis.map(Json))
            .bind(analysis_error)
            .bind(Json(queries))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current result for a target, `None` if the record does not exist.
    pub async fn find(
        pool: &PgPool,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<Option<AnalysisResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {table} WHERE id = $1 AND organization = $2",
            table = target.kind.table()
        );
        let row = sqlx::query_as::<_, AnalysisColumns>(&query)
            .bind(&target.id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|columns| columns.into_result(target, organization_id)))
    }
}
