//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod analysis_repo;
pub mod definition_repo;
pub mod job_repo;
pub mod lock_repo;
pub mod webhook_repo;

pub use analysis_repo::AnalysisRepo;
pub use definition_repo::DefinitionRepo;
pub use job_repo::JobRepo;
pub use lock_repo::LockRepo;
pub use webhook_repo::WebhookRepo;
