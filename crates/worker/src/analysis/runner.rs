//! Analysis runner: one metric or experiment recomputation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use abacus_core::stats::{AnalysisRows, AnalysisSummary, Row};
use abacus_db::models::analysis::{
    AnalysisResult, AnalysisTarget, QueryRecord, QueryStatus, TargetKind,
};
use abacus_db::models::definition::MetricDefinition;
use abacus_db::store::{AnalysisStore, DefinitionSource};
use abacus_db::StoreError;
use chrono::Utc;
use futures::future::join_all;

use super::datasource::{DataSource, DataSourceRegistry, QueryError};
use super::query::{PlannedQuery, QueryPlan, QueryPurpose};

/// Infrastructure failures of a run. Query failures are not errors here:
/// they end up in the result's `analysis_error`.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("A newer run of {0} has started; result discarded")]
    Superseded(AnalysisTarget),
}

enum PlanError {
    Store(StoreError),
    Rejected(String),
}

impl From<StoreError> for PlanError {
    fn from(e: StoreError) -> Self {
        PlanError::Store(e)
    }
}

struct QueryOutcome {
    purpose: QueryPurpose,
    record: QueryRecord,
    rows: Result<Vec<Row>, QueryError>,
}

/// Runs the queries for a metric or experiment and stores the outcome.
#[derive(Clone)]
pub struct AnalysisRunner {
    store: Arc<dyn AnalysisStore>,
    definitions: Arc<dyn DefinitionSource>,
    sources: Arc<DataSourceRegistry>,
    query_timeout: Duration,
}

impl AnalysisRunner {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        definitions: Arc<dyn DefinitionSource>,
        sources: Arc<DataSourceRegistry>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            definitions,
            sources,
            query_timeout,
        }
    }

    /// Recompute `target` and overwrite its stored result.
    ///
    /// `run_started` is written before any query is issued. The terminal
    /// write only lands if no newer run has started since; otherwise the
    /// computed result is dropped and [`RunnerError::Superseded`] returned.
    pub async fn run(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<AnalysisResult, RunnerError> {
        let run_started = self
            .store
            .mark_run_started(target, organization_id, Utc::now())
            .await?;

        let (analysis, analysis_error, queries) = match self.plan(target, organization_id).await {
            Ok(plan) => self.execute(&plan).await,
            Err(PlanError::Store(e)) => return Err(e.into()),
            Err(PlanError::Rejected(message)) => (None, Some(message), Vec::new()),
        };

        let saved = self
            .store
            .save_result(
                target,
                organization_id,
                run_started,
                analysis.as_ref(),
                analysis_error.as_deref(),
                &queries,
            )
            .await?;
        if !saved {
            tracing::warn!(%target, organization_id, "Analysis superseded by a newer run");
            return Err(RunnerError::Superseded(target.clone()));
        }

        match (&analysis, &analysis_error) {
            (Some(summary), _) => tracing::info!(
                %target,
                organization_id,
                users = summary.users,
                queries = queries.len(),
                "Analysis complete",
            ),
            (None, Some(error)) => {
                tracing::warn!(%target, organization_id, error = %error, "Analysis failed")
            }
            (None, None) => {}
        }

        Ok(AnalysisResult {
            target: target.clone(),
            organization_id: organization_id.to_string(),
            run_started: Some(run_started),
            analysis,
            analysis_error,
            queries,
        })
    }

    async fn plan(
        &self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> Result<QueryPlan, PlanError> {
        let plan = match target.kind {
            TargetKind::Metric => {
                let metric = self.metric(&target.id, organization_id).await?;
                QueryPlan::for_metric(&metric)
            }
            TargetKind::Experiment => {
                let experiment = self
                    .definitions
                    .experiment(&target.id, organization_id)
                    .await?
                    .ok_or_else(|| {
                        PlanError::Rejected(format!("Experiment {} not found", target.id))
                    })?;
                let metric = self.metric(&experiment.metric_id, organization_id).await?;
                QueryPlan::for_experiment(&experiment, &metric)
            }
        };
        plan.map_err(|e| PlanError::Rejected(e.to_string()))
    }

    async fn metric(
        &self,
        id: &str,
        organization_id: &str,
    ) -> Result<MetricDefinition, PlanError> {
        self.definitions
            .metric(id, organization_id)
            .await?
            .ok_or_else(|| PlanError::Rejected(format!("Metric {id} not found")))
    }

    /// Issue every planned query and aggregate. Returns the summary on
    /// success, or the first failure message, plus one record per query.
    async fn execute(
        &self,
        plan: &QueryPlan,
    ) -> (Option<AnalysisSummary>, Option<String>, Vec<QueryRecord>) {
        let source = match self.sources.get(&plan.datasource) {
            Ok(source) => source,
            Err(e) => return (None, Some(e.to_string()), Vec::new()),
        };

        let outcomes = join_all(
            plan.queries
                .iter()
                .map(|query| self.issue(source.as_ref(), query)),
        )
        .await;

        let mut rows = AnalysisRows::default();
        let mut error = None;
        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.rows {
                Ok(result) => match outcome.purpose {
                    QueryPurpose::Totals => rows.totals = result,
                    QueryPurpose::Dates => rows.dates = result,
                    QueryPurpose::Percentiles => rows.percentiles = result,
                },
                Err(e) => {
                    error.get_or_insert_with(|| {
                        format!("{} query failed: {e}", outcome.record.name)
                    });
                }
            }
            records.push(outcome.record);
        }

        match error {
            Some(message) => (None, Some(message), records),
            None => {
                let summary =
                    AnalysisSummary::from_rows(&rows, plan.binomial, plan.segment.clone());
                (Some(summary), None, records)
            }
        }
    }

    async fn issue(&self, source: &dyn DataSource, query: &PlannedQuery) -> QueryOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();

        let rows = tokio::time::timeout(self.query_timeout, source.query(&query.request))
            .await
            .unwrap_or(Err(QueryError::Timeout(self.query_timeout)));

        let duration_ms = clock.elapsed().as_millis() as i64;
        let (status, row_count, error) = match &rows {
            Ok(rows) => (QueryStatus::Succeeded, Some(rows.len() as i64), None),
            Err(e) => (QueryStatus::Failed, None, Some(e.to_string())),
        };
        tracing::debug!(
            query = %query.request.name,
            duration_ms,
            ?status,
            "Analysis query finished",
        );

        QueryOutcome {
            purpose: query.purpose,
            record: QueryRecord {
                name: query.request.name.clone(),
                query: query.request.sql.clone(),
                status,
                started_at,
                finished_at: Some(Utc::now()),
                duration_ms: Some(duration_ms),
                row_count,
                error,
            },
            rows,
        }
    }
}
