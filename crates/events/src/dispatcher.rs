//! Fan-out of a completed analysis to an organization's webhook endpoints.

use std::sync::Arc;

use abacus_core::types::Timestamp;
use abacus_db::models::analysis::{AnalysisResult, AnalysisTarget};
use abacus_db::models::webhook::WebhookEndpoint;
use abacus_db::store::WebhookStore;
use abacus_db::StoreError;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;

use crate::delivery::webhook::WebhookDelivery;
use crate::payload::WebhookPayload;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { status_code: u16 },
    Failed { error: String },
}

/// Per-endpoint outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub webhook_id: String,
    pub endpoint: String,
    pub attempted_at: Timestamp,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Only successful analyses are ever delivered.
    #[error("{0} has no successful analysis to deliver")]
    NotSuccessful(AnalysisTarget),

    #[error("Failed to serialize webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// WebhookDispatcher
// ---------------------------------------------------------------------------

/// Delivers analysis results to every endpoint of the owning organization.
///
/// Deliveries run concurrently and are isolated from each other: a failing
/// endpoint only affects its own report and its own `error` column.
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    delivery: WebhookDelivery,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, delivery: WebhookDelivery) -> Self {
        Self { store, delivery }
    }

    /// Deliver `result` to all endpoints registered for `organization_id`.
    ///
    /// Delivery failures are reported, not returned as errors. Errors are
    /// reserved for a non-successful `result` and for store failures.
    pub async fn dispatch(
        &self,
        result: &AnalysisResult,
        organization_id: &str,
    ) -> Result<Vec<DeliveryReport>, DispatchError> {
        let payload = WebhookPayload::for_result(result, Utc::now())
            .ok_or_else(|| DispatchError::NotSuccessful(result.target.clone()))?;
        let body = serde_json::to_vec(&payload)?;

        let endpoints = self.store.list_webhooks(organization_id).await?;
        if endpoints.is_empty() {
            tracing::debug!(
                target_id = %result.target,
                organization_id,
                "No webhooks registered, nothing to dispatch"
            );
            return Ok(Vec::new());
        }

        let reports = join_all(endpoints.iter().map(|ep| self.deliver_one(ep, &body)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, StoreError>>()?;

        let delivered = reports.iter().filter(|r| r.is_delivered()).count();
        tracing::info!(
            target_id = %result.target,
            organization_id,
            delivered,
            failed = reports.len() - delivered,
            "Webhook dispatch finished"
        );
        Ok(reports)
    }

    async fn deliver_one(
        &self,
        webhook: &WebhookEndpoint,
        body: &[u8],
    ) -> Result<DeliveryReport, StoreError> {
        let attempted_at = Utc::now();
        let outcome = match self
            .delivery
            .deliver(&webhook.endpoint, &webhook.signing_key, body)
            .await
        {
            Ok(status_code) => {
                self.store
                    .record_webhook_success(&webhook.id, Utc::now())
                    .await?;
                DeliveryOutcome::Delivered { status_code }
            }
            Err(e) => {
                tracing::warn!(
                    webhook_id = %webhook.id,
                    endpoint = %webhook.endpoint,
                    error = %e,
                    "Webhook delivery failed"
                );
                let error = e.to_string();
                self.store.record_webhook_error(&webhook.id, &error).await?;
                DeliveryOutcome::Failed { error }
            }
        };

        Ok(DeliveryReport {
            webhook_id: webhook.id.clone(),
            endpoint: webhook.endpoint.clone(),
            attempted_at,
            outcome,
        })
    }
}
