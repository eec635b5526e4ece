//! Domain building blocks for the Abacus analysis pipeline.
//!
//! This crate has zero internal dependencies so the persistence layer, the
//! scheduler process, and the admin API can all share the same types:
//!
//! - [`jobs`]: the fixed set of job kinds and their typed payloads.
//! - [`schedule`]: cron / interval / one-shot recurrence rules.
//! - [`scheduling`]: lock policy constants and the per-run state machine.
//! - [`stats`]: aggregation of warehouse rows into analysis summaries.
//! - [`signing`]: webhook HMAC signatures and signing-key generation.

pub mod error;
pub mod jobs;
pub mod schedule;
pub mod scheduling;
pub mod signing;
pub mod stats;
pub mod types;
