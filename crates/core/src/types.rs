use chrono::{DateTime, Utc};

/// Primary key type for serial database ids (jobs).
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = DateTime<Utc>;
