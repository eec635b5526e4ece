//! Metric and experiment definitions loaded from a YAML file.
//!
//! ```yaml
//! metrics:
//!   - id: met_signup
//!     datasource: warehouse
//!     name: Signups
//!     type: binomial
//!     table: events
//!     column: signed_up
//! experiments:
//!   - id: exp_1
//!     organization: org_1
//!     datasource: warehouse
//!     name: New onboarding
//!     tracking_key: onboarding-v2
//!     metric_id: met_signup
//!     start_date: 2024-01-01T00:00:00Z
//! ```
//!
//! An entry without `organization` applies to every organization.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StoreError;
use crate::models::definition::{ExperimentDefinition, MetricDefinition};
use crate::store::DefinitionSource;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileDefinitions {
    #[serde(default)]
    metrics: Vec<MetricDefinition>,
    #[serde(default)]
    experiments: Vec<ExperimentDefinition>,
}

impl FileDefinitions {
    /// Read and parse the definitions file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Definitions(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(contents).map_err(|e| StoreError::Definitions(e.to_string()))
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }
}

fn applies_to(definition_org: &str, organization: &str) -> bool {
    definition_org.is_empty() || definition_org == organization
}

#[async_trait]
impl DefinitionSource for FileDefinitions {
    async fn metric(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<MetricDefinition>, StoreError> {
        Ok(self
            .metrics
            .iter()
            .find(|m| m.id == id && applies_to(&m.organization, organization))
            .cloned())
    }

    async fn experiment(
        &self,
        id: &str,
        organization: &str,
    ) -> Result<Option<ExperimentDefinition>, StoreError> {
        Ok(self
            .experiments
            .iter()
            .find(|e| e.id == id && applies_to(&e.organization, organization))
            .cloned())
    }
}
