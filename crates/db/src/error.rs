/// Error type for every store operation.
///
/// Store failures are infrastructure-level: the scheduler treats them as
/// fatal, unlike handler failures which are recorded on the job.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Definition file error: {0}")]
    Definitions(String),
}
