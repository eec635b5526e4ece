//! The fixed set of pipeline job kinds and their strongly-typed payloads.
//!
//! Persisted jobs store a `name` column and an opaque JSON `data` column;
//! [`JobData`] is the tagged union that turns the pair back into a typed
//! payload so the handler table can be keyed by [`JobKind`].

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job names
// ---------------------------------------------------------------------------

/// Recompute the analysis of one experiment.
pub const UPDATE_EXPERIMENT_RESULTS: &str = "updateExperimentResults";

/// Recompute the analysis of one metric.
pub const UPDATE_METRICS: &str = "updateMetrics";

/// Deliver the latest experiment analysis to the organization's webhooks.
pub const WEBHOOKS: &str = "webhooks";

/// Discriminant of [`JobData`], used as the handler-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "updateExperimentResults")]
    UpdateExperimentResults,
    #[serde(rename = "updateMetrics")]
    UpdateMetrics,
    #[serde(rename = "webhooks")]
    Webhooks,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::UpdateExperimentResults,
        JobKind::UpdateMetrics,
        JobKind::Webhooks,
    ];

    /// The persisted job name.
    pub fn name(self) -> &'static str {
        match self {
            JobKind::UpdateExperimentResults => UPDATE_EXPERIMENT_RESULTS,
            JobKind::UpdateMetrics => UPDATE_METRICS,
            JobKind::Webhooks => WEBHOOKS,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of an `updateExperimentResults` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentJob {
    pub id: String,
    pub organization_id: String,
}

/// Payload of an `updateMetrics` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricJob {
    pub id: String,
    pub organization_id: String,
}

/// Payload of a `webhooks` job. `id` is the experiment whose results are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJob {
    pub id: String,
    pub organization_id: String,
}

/// Error turning a persisted `(name, data)` pair into [`JobData`].
#[derive(Debug, thiserror::Error)]
pub enum JobDataError {
    #[error("Unknown job name: {0}")]
    UnknownKind(String),

    #[error("Invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: JobKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A job payload tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum JobData {
    #[serde(rename = "updateExperimentResults")]
    UpdateExperimentResults(ExperimentJob),
    #[serde(rename = "updateMetrics")]
    UpdateMetrics(MetricJob),
    #[serde(rename = "webhooks")]
    Webhooks(WebhookJob),
}

impl JobData {
    pub fn update_experiment_results(id: &str, organization_id: &str) -> Self {
        JobData::UpdateExperimentResults(ExperimentJob {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
        })
    }

    pub fn update_metrics(id: &str, organization_id: &str) -> Self {
        JobData::UpdateMetrics(MetricJob {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
        })
    }

    pub fn webhooks(experiment_id: &str, organization_id: &str) -> Self {
        JobData::Webhooks(WebhookJob {
            id: experiment_id.to_string(),
            organization_id: organization_id.to_string(),
        })
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobData::UpdateExperimentResults(_) => JobKind::UpdateExperimentResults,
            JobData::UpdateMetrics(_) => JobKind::UpdateMetrics,
            JobData::Webhooks(_) => JobKind::Webhooks,
        }
    }

    /// Id of the experiment or metric this job targets.
    pub fn target_id(&self) -> &str {
        match self {
            JobData::UpdateExperimentResults(p) => &p.id,
            JobData::UpdateMetrics(p) => &p.id,
            JobData::Webhooks(p) => &p.id,
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            JobData::UpdateExperimentResults(p) => &p.organization_id,
            JobData::UpdateMetrics(p) => &p.organization_id,
            JobData::Webhooks(p) => &p.organization_id,
        }
    }

    /// Job identity: the unit of mutual exclusion (name + target).
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind(),
            self.organization_id(),
            self.target_id()
        )
    }

    /// The untagged payload, as stored in the `data` column.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            JobData::UpdateExperimentResults(p) => serde_json::to_value(p),
            JobData::UpdateMetrics(p) => serde_json::to_value(p),
            JobData::Webhooks(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild a typed payload from a persisted job name and data column.
    pub fn from_parts(name: &str, data: serde_json::Value) -> Result<Self, JobDataError> {
        let kind =
            JobKind::from_name(name).ok_or_else(|| JobDataError::UnknownKind(name.to_string()))?;
        let tagged = serde_json::json!({ "name": name, "data": data });
        serde_json::from_value(tagged)
            .map_err(|source| JobDataError::InvalidPayload { kind, source })
    }
}
