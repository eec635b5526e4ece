//! Handlers for webhook endpoint administration.
//!
//! Signing keys are generated here, returned once on creation, and never
//! updated: rotating a key means deleting the endpoint and creating it again.

use abacus_core::error::CoreError;
use abacus_core::signing::generate_signing_key;
use abacus_db::models::webhook::{new_webhook_id, CreateWebhook, WebhookCreatedResponse};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrganizationQuery {
    pub organization_id: String,
}

fn validate(input: &CreateWebhook) -> Result<(), CoreError> {
    if input.organization_id.trim().is_empty() {
        return Err(CoreError::Validation("organization_id is required".into()));
    }
    if input.name.trim().is_empty() {
        return Err(CoreError::Validation("name is required".into()));
    }
    let endpoint = input.endpoint.trim();
    if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
        return Err(CoreError::Validation(
            "endpoint must be an http(s) URL".into(),
        ));
    }
    Ok(())
}

/// POST /api/v1/webhooks
///
/// Returns 201 with the generated signing key.
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(input): Json<CreateWebhook>,
) -> AppResult<impl IntoResponse> {
    validate(&input)?;

    let webhook = state
        .stores
        .webhooks
        .create_webhook(
            &new_webhook_id(),
            &input.organization_id,
            input.name.trim(),
            input.endpoint.trim(),
            &generate_signing_key(),
        )
        .await?;

    tracing::info!(
        webhook_id = %webhook.id,
        organization_id = %webhook.organization,
        "Webhook created"
    );
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: WebhookCreatedResponse::from(webhook),
        }),
    ))
}

/// GET /api/v1/webhooks?organization_id=
pub async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<impl IntoResponse> {
    let webhooks = state
        .stores
        .webhooks
        .list_webhooks(&query.organization_id)
        .await?;
    Ok(Json(DataResponse { data: webhooks }))
}

/// DELETE /api/v1/webhooks/{id}?organization_id=
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<StatusCode> {
    let deleted = state
        .stores
        .webhooks
        .delete_webhook(&id, &query.organization_id)
        .await?;
    if !deleted {
        return Err(CoreError::NotFound {
            entity: "Webhook",
            id,
        }
        .into());
    }
    tracing::info!(webhook_id = %id, "Webhook deleted");
    Ok(StatusCode::NO_CONTENT)
}
