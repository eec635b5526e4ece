//! SQL for metric and experiment analyses.
//!
//! Every plan reduces raw events to one value per user (`per_user`), then
//! asks the warehouse for the sufficient statistics the aggregation step
//! reads: `count`, `sum`, `sum_squares`, optionally grouped by `variation`
//! or by `date`, and `p`/`v` percentile pairs for non-binomial metrics.
//!
//! A metric's events come either from its own `sql` (which must select
//! `user_id`, `value` and `timestamp`) or from `table` + `column`.
//! Experiment exposures are read from [`EXPOSURE_TABLE`].

use abacus_core::types::Timestamp;
use abacus_db::models::definition::{ExperimentDefinition, MetricDefinition};
use chrono::SecondsFormat;

use super::datasource::{QueryError, QueryRequest};

/// Metric analyses cover this many trailing days.
pub const METRIC_WINDOW_DAYS: u32 = 90;

/// Exposure log with `user_id`, `experiment_id`, `variation_id`, `timestamp`.
pub const EXPOSURE_TABLE: &str = "experiment_viewed";

const PERCENTILES: [f64; 5] = [0.5, 0.75, 0.9, 0.95, 0.99];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPurpose {
    Totals,
    Dates,
    Percentiles,
}

impl QueryPurpose {
    pub fn name(self) -> &'static str {
        match self {
            QueryPurpose::Totals => "totals",
            QueryPurpose::Dates => "dates",
            QueryPurpose::Percentiles => "percentiles",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub purpose: QueryPurpose,
    pub request: QueryRequest,
}

/// Everything one analysis run sends to its data source.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub datasource: String,
    pub binomial: bool,
    pub segment: Option<String>,
    pub queries: Vec<PlannedQuery>,
}

impl QueryPlan {
    /// Plan for a metric on its own.
    pub fn for_metric(metric: &MetricDefinition) -> Result<Self, QueryError> {
        let per_user = format!(
            "WITH source AS ({source}), \
             per_user AS ( \
                 SELECT user_id, MIN(timestamp)::date AS date, {value} AS value, \
                     COUNT(*) AS events \
                 FROM source \
                 WHERE timestamp >= NOW() - INTERVAL '{METRIC_WINDOW_DAYS} days'{nulls} \
                 GROUP BY user_id \
             )",
            source = metric_source(metric)?,
            value = user_value(metric, "value", "1"),
            nulls = null_filter(metric, " AND value IS NOT NULL"),
        );

        let mut queries = vec![
            planned(QueryPurpose::Totals, format!("{per_user} {}", totals_sql())),
            planned(QueryPurpose::Dates, format!("{per_user} {}", dates_sql())),
        ];
        if !metric.is_binomial() {
            queries.push(planned(
                QueryPurpose::Percentiles,
                format!("{per_user} {}", percentiles_sql()),
            ));
        }

        Ok(Self {
            datasource: metric.datasource.clone(),
            binomial: metric.is_binomial(),
            segment: metric.segment.clone(),
            queries,
        })
    }

    /// Plan for an experiment's goal metric, split by variation.
    ///
    /// Exposed users without metric events count with a value of zero.
    pub fn for_experiment(
        experiment: &ExperimentDefinition,
        metric: &MetricDefinition,
    ) -> Result<Self, QueryError> {
        let end = experiment
            .end_date
            .map(|end| format!(" AND timestamp <= {}", timestamp_literal(end)))
            .unwrap_or_default();

        let per_user = format!(
            "WITH source AS ({source}), \
             exposures AS ( \
                 SELECT user_id, MIN(variation_id) AS variation, \
                     MIN(timestamp) AS first_exposure \
                 FROM {EXPOSURE_TABLE} \
                 WHERE experiment_id = {key} AND timestamp >= {start}{end} \
                 GROUP BY user_id \
             ), \
             per_user AS ( \
                 SELECT e.user_id, e.variation, e.first_exposure::date AS date, {value} AS value, \
                     COUNT(m.user_id) AS events \
                 FROM exposures e \
                 LEFT JOIN source m \
                     ON m.user_id = e.user_id AND m.timestamp >= e.first_exposure{nulls} \
                 GROUP BY e.user_id, e.variation, e.first_exposure \
             )",
            source = metric_source(metric)?,
            key = string_literal(&experiment.tracking_key),
            start = timestamp_literal(experiment.start_date),
            value = user_value(
                metric,
                "m.value",
                "CASE WHEN COUNT(m.user_id) > 0 THEN 1 ELSE 0 END"
            ),
            nulls = null_filter(metric, " AND m.value IS NOT NULL"),
        );

        Ok(Self {
            datasource: experiment.datasource.clone(),
            binomial: metric.is_binomial(),
            segment: metric.segment.clone(),
            queries: vec![
                planned(
                    QueryPurpose::Totals,
                    format!("{per_user} {}", variation_totals_sql()),
                ),
                planned(QueryPurpose::Dates, format!("{per_user} {}", dates_sql())),
            ],
        })
    }
}

const MOMENTS: &str = "COUNT(*) AS count, SUM(value) AS sum, \
                       SUM(value * value) AS sum_squares, SUM(events) AS events";

fn totals_sql() -> String {
    format!("SELECT {MOMENTS} FROM per_user")
}

fn variation_totals_sql() -> String {
    format!("SELECT variation, {MOMENTS} FROM per_user GROUP BY variation ORDER BY variation")
}

fn dates_sql() -> String {
    format!("SELECT date, {MOMENTS} FROM per_user GROUP BY date ORDER BY date")
}

fn percentiles_sql() -> String {
    let ranks = PERCENTILES
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT unnest(ARRAY[{ranks}]::float8[]) AS p, unnest(pcts) AS v FROM ( \
             SELECT percentile_cont(ARRAY[{ranks}]::float8[]) \
                 WITHIN GROUP (ORDER BY value) AS pcts \
             FROM per_user \
         ) ranked"
    )
}

fn planned(purpose: QueryPurpose, sql: String) -> PlannedQuery {
    PlannedQuery {
        purpose,
        request: QueryRequest {
            name: purpose.name().to_string(),
            sql,
        },
    }
}

/// Raw events as `(user_id, value, timestamp)`.
fn metric_source(metric: &MetricDefinition) -> Result<String, QueryError> {
    if let Some(sql) = metric.sql.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok(sql.trim().trim_end_matches(';').to_string());
    }

    let table = metric.table.as_deref().ok_or_else(|| {
        QueryError::InvalidDefinition(format!("metric {} has neither sql nor table", metric.id))
    })?;
    let user_id = metric.user_id_column.as_deref().unwrap_or("user_id");
    let timestamp = metric.timestamp_column.as_deref().unwrap_or("timestamp");
    let value = match metric.column.as_deref() {
        Some(column) if !metric.is_binomial() => identifier(column)?,
        _ => "1",
    };

    Ok(format!(
        "SELECT {} AS user_id, {value} AS value, {} AS timestamp FROM {}",
        identifier(user_id)?,
        identifier(timestamp)?,
        identifier(table)?,
    ))
}

/// Per-user aggregate of `column`, capped when the metric has a cap.
fn user_value(metric: &MetricDefinition, column: &str, binomial: &str) -> String {
    if metric.is_binomial() {
        return binomial.to_string();
    }
    let sum = format!("COALESCE(SUM({column}), 0)");
    match metric.cap.filter(|cap| cap.is_finite() && *cap > 0.0) {
        Some(cap) => format!("LEAST({sum}, {cap})"),
        None => sum,
    }
}

fn null_filter(metric: &MetricDefinition, filter: &str) -> String {
    if metric.ignore_nulls {
        filter.to_string()
    } else {
        String::new()
    }
}

/// Accept plain (optionally schema-qualified) identifiers only.
fn identifier(name: &str) -> Result<&str, QueryError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(QueryError::InvalidDefinition(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn timestamp_literal(at: Timestamp) -> String {
    format!(
        "'{}'::timestamptz",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
