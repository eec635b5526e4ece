//! Row types and DTOs, one module per table family.

pub mod analysis;
pub mod definition;
pub mod job;
pub mod lock;
pub mod webhook;
