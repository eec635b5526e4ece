//! Metric and experiment definitions consumed by the analysis runner.
//!
//! Definitions can come from the database or from a YAML file (see
//! [`crate::FileDefinitions`]); both produce these same types.

use std::fmt;
use std::str::FromStr;

use abacus_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metric value semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Binomial,
    Count,
    Duration,
    Revenue,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Binomial => "binomial",
            MetricType::Count => "count",
            MetricType::Duration => "duration",
            MetricType::Revenue => "revenue",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown metric type: {0}")]
pub struct UnknownMetricType(pub String);

impl FromStr for MetricType {
    type Err = UnknownMetricType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binomial" => Ok(MetricType::Binomial),
            "count" => Ok(MetricType::Count),
            "duration" => Ok(MetricType::Duration),
            "revenue" => Ok(MetricType::Revenue),
            other => Err(UnknownMetricType(other.to_string())),
        }
    }
}

impl TryFrom<String> for MetricType {
    type Error = UnknownMetricType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A metric definition (row from `metrics`, or an entry of the YAML file).
///
/// Either `sql` (a query yielding `user_id`, `value`, `timestamp` columns) or
/// `table` + `column` describes where values come from.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    /// Empty in a definitions file means "any organization".
    #[serde(default)]
    pub organization: String,
    pub datasource: String,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    #[sqlx(rename = "table_name")]
    pub table: Option<String>,
    #[serde(default)]
    #[sqlx(rename = "column_name")]
    pub column: Option<String>,
    #[serde(default)]
    pub user_id_column: Option<String>,
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub cap: Option<f64>,
    #[serde(default)]
    pub ignore_nulls: bool,
    #[serde(default)]
    pub segment: Option<String>,
}

impl MetricDefinition {
    pub fn is_binomial(&self) -> bool {
        self.metric_type == MetricType::Binomial
    }
}

/// An experiment definition. The goal metric is analysed per variation.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub id: String,
    #[serde(default)]
    pub organization: String,
    pub datasource: String,
    pub name: String,
    pub tracking_key: String,
    pub metric_id: String,
    pub start_date: Timestamp,
    #[serde(default)]
    pub end_date: Option<Timestamp>,
}
