//! Repository for the `webhooks` table.

use abacus_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::webhook::WebhookEndpoint;

/// Column list for `webhooks` queries.
const COLUMNS: &str = "\
    id, organization, name, endpoint, signing_key, last_success, error, created";

/// Provides CRUD operations for webhook endpoints.
pub struct WebhookRepo;

impl WebhookRepo {
    /// Create a new webhook endpoint.
    pub async fn create(
        pool: &PgPool,
        id: &str,
        organization: &str,
        name: &str,
        endpoint: &str,
        signing_key: &str,
    ) -> Result<WebhookEndpoint, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhooks (id, organization, name, endpoint, signing_key) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WebhookEndpoint>(&query)
            .bind(id)
            .bind(organization)
            .bind(name)
            .bind(endpoint)
            .bind(signing_key)
            .fetch_one(pool)
            .await
    }

    /// List an organization's webhooks, oldest first.
    pub async fn list_by_organization(
        pool: &PgPool,
        organization: &str,
    ) -> Result<Vec<WebhookEndpoint>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM webhooks WHERE organization = $1 ORDER BY created ASC, id ASC"
        );
        sqlx::query_as::<_, WebhookEndpoint>(&query)
            .bind(organization)
            .fetch_all(pool)
            .await
    }

    /// Find a webhook by ID within an organization.
    pub async fn find(
        pool: &PgPool,
        id: &str,
        organization: &str,
    ) -> Result<Option<WebhookEndpoint>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM webhooks WHERE id = $1 AND organization = $2");
        sqlx::query_as::<_, WebhookEndpoint>(&query)
            .bind(id)
            .bind(organization)
            .fetch_optional(pool)
            .await
    }

    /// Delete a webhook. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: &str, organization: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND organization = $2")
            .bind(id)
            .bind(organization)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a delivery the receiver accepted. Clears any previous error.
    pub async fn record_success(pool: &PgPool, id: &str, at: Timestamp) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhooks SET last_success = $2, error = NULL WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a failed delivery. `last_success` is left untouched.
    pub async fn record_error(pool: &PgPool, id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhooks SET error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(pool)
            .await?;
        Ok(())
    }
}
