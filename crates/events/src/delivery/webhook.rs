//! Signed webhook delivery.
//!
//! [`WebhookDelivery`] POSTs a pre-serialized JSON body to an endpoint with an
//! HMAC-SHA256 signature of those exact bytes in the
//! [`SIGNATURE_HEADER`] header. There is exactly one attempt per call:
//! repeated failures surface through the endpoint's `error` / `last_success`
//! columns instead of retries.

use std::time::Duration;

use abacus_core::signing::{sign_payload, SIGNATURE_HEADER};
use reqwest::header::CONTENT_TYPE;

/// Default HTTP timeout for a single delivery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// No response within the configured timeout.
    #[error("Webhook timed out after {0:?}")]
    Timeout(Duration),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers signed payloads to external webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDelivery {
    /// Create a delivery service whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Sign `body` with `signing_key` and POST it to `url`.
    ///
    /// Returns the response status code on a 2xx response.
    pub async fn deliver(
        &self,
        url: &str,
        signing_key: &str,
        body: &[u8],
    ) -> Result<u16, WebhookError> {
        let signature = sign_payload(signing_key, body);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Timeout(self.timeout)
                } else {
                    WebhookError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::HttpStatus(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
