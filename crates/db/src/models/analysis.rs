//! Analysis results persisted on metric and experiment records.

use std::fmt;

use abacus_core::stats::AnalysisSummary;
use abacus_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Which kind of record an analysis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Metric,
    Experiment,
}

impl TargetKind {
    /// Table holding the record (and its result columns).
    pub(crate) fn table(self) -> &'static str {
        match self {
            TargetKind::Metric => "metrics",
            TargetKind::Experiment => "experiments",
        }
    }
}

/// The metric or experiment an analysis is computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisTarget {
    pub kind: TargetKind,
    pub id: String,
}

impl AnalysisTarget {
    pub fn metric(id: &str) -> Self {
        Self {
            kind: TargetKind::Metric,
            id: id.to_string(),
        }
    }

    pub fn experiment(id: &str) -> Self {
        Self {
            kind: TargetKind::Experiment,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for AnalysisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Metric => write!(f, "metric {}", self.id),
            TargetKind::Experiment => write!(f, "experiment {}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Query records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Running,
    Succeeded,
    Failed,
}

/// Execution record of one external query issued during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub name: String,
    pub query: String,
    pub status: QueryStatus,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub row_count: Option<i64>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// AnalysisResult
// ---------------------------------------------------------------------------

/// The durable outcome of one analysis run.
///
/// A terminal result has exactly one of `analysis` / `analysis_error` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub target: AnalysisTarget,
    pub organization_id: String,
    pub run_started: Option<Timestamp>,
    pub analysis: Option<AnalysisSummary>,
    pub analysis_error: Option<String>,
    pub queries: Vec<QueryRecord>,
}

impl AnalysisResult {
    /// A run that has started but not reached a terminal state.
    pub fn is_in_flight(&self) -> bool {
        self.run_started.is_some() && self.analysis.is_none() && self.analysis_error.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.analysis.is_some() && self.analysis_error.is_none()
    }
}

/// Result columns as read from `metrics` / `experiments`.
#[derive(Debug, FromRow)]
pub(crate) struct AnalysisColumns {
    pub run_started: Option<Timestamp>,
    pub analysis: Option<Json<AnalysisSummary>>,
    pub analysis_error: Option<String>,
    pub queries: Json<Vec<QueryRecord>>,
}

impl AnalysisColumns {
    pub(crate) fn into_result(
        self,
        target: &AnalysisTarget,
        organization_id: &str,
    ) -> AnalysisResult {
        AnalysisResult {
            target: target.clone(),
            organization_id: organization_id.to_string(),
            run_started: self.run_started,
            analysis: self.analysis.map(|Json(summary)| summary),
            analysis_error: self.analysis_error,
            queries: self.queries.0,
        }
    }
}
