//! JSON body delivered to webhook receivers.

use abacus_core::stats::AnalysisSummary;
use abacus_core::types::Timestamp;
use abacus_db::models::analysis::{AnalysisResult, AnalysisTarget};
use serde::{Deserialize, Serialize};

/// Event name for a freshly computed analysis.
pub const ANALYSIS_UPDATED: &str = "analysis.updated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(flatten)]
    pub target: AnalysisTarget,
    pub organization_id: String,
    /// When this delivery was built.
    pub timestamp: Timestamp,
    /// Start of the run that produced `analysis`.
    pub run_started: Option<Timestamp>,
    pub analysis: AnalysisSummary,
}

impl WebhookPayload {
    /// Build the payload for a successful result; `None` for anything else.
    pub fn for_result(result: &AnalysisResult, timestamp: Timestamp) -> Option<Self> {
        if !result.is_success() {
            return None;
        }
        Some(Self {
            event: ANALYSIS_UPDATED.to_string(),
            target: result.target.clone(),
            organization_id: result.organization_id.clone(),
            timestamp,
            run_started: result.run_started,
            analysis: result.analysis.clone()?,
        })
    }
}
