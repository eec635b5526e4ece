//! Outbound delivery of analysis results.
//!
//! - [`WebhookDelivery`]: one signed HTTP POST, no retries.
//! - [`WebhookDispatcher`]: fans a completed analysis out to every endpoint
//!   registered for the organization and records each outcome.
//! - [`WebhookPayload`]: the JSON body receivers get.

pub mod delivery;
pub mod dispatcher;
pub mod payload;

pub use delivery::webhook::{WebhookDelivery, WebhookError};
pub use dispatcher::{DeliveryOutcome, DeliveryReport, DispatchError, WebhookDispatcher};
pub use payload::WebhookPayload;
