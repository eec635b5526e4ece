//! Webhook endpoint models and DTOs.

use abacus_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `webhooks` table.
///
/// `signing_key` is never serialized to responses and has no update path:
/// rotating it means deleting the endpoint and creating a new one.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub organization: String,
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub signing_key: String,
    pub last_success: Option<Timestamp>,
    pub error: Option<String>,
    pub created: Timestamp,
}

/// DTO for registering a webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhook {
    pub organization_id: String,
    pub name: String,
    pub endpoint: String,
}

/// Response returned when a webhook is created.
/// Includes the signing key (shown exactly once).
#[derive(Debug, Clone, Serialize)]
pub struct WebhookCreatedResponse {
    pub id: String,
    pub organization: String,
    pub name: String,
    pub endpoint: String,
    pub signing_key: String,
    pub created: Timestamp,
}

impl From<WebhookEndpoint> for WebhookCreatedResponse {
    fn from(w: WebhookEndpoint) -> Self {
        Self {
            id: w.id,
            organization: w.organization,
            name: w.name,
            endpoint: w.endpoint,
            signing_key: w.signing_key,
            created: w.created,
        }
    }
}

/// Generate a new webhook id (`wh_` + 32 hex chars).
pub fn new_webhook_id() -> String {
    format!("wh_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn signing_key_is_not_serialized() {
        let webhook = WebhookEndpoint {
            id: new_webhook_id(),
            organization: "org_1".into(),
            name: "Slack relay".into(),
            endpoint: "https://example.com/hook".into(),
            signing_key: "wk_secret".into(),
            last_success: None,
            error: None,
            created: Utc::now(),
        };
        let json = serde_json::to_value(&webhook).unwrap();
        assert!(json.get("signing_key").is_none());
        assert_eq!(json["endpoint"], "https://example.com/hook");
    }

    #[test]
    fn webhook_ids_are_prefixed() {
        let id = new_webhook_id();
        assert!(id.starts_with("wh_"));
        assert_eq!(id.len(), 35);
    }
}
