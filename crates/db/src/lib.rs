//! Persistence for the Abacus pipeline.
//!
//! - [`models`]: row types and DTOs.
//! - [`repositories`]: zero-sized `*Repo` structs with async SQL methods
//!   taking `&PgPool`.
//! - [`store`]: the async traits the pipeline is written against.
//! - [`PgStore`] / [`MemoryStore`]: Postgres-backed and in-process
//!   implementations of those traits.
//! - [`FileDefinitions`]: metric/experiment definitions read from YAML.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod file_definitions;
pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use file_definitions::FileDefinitions;
pub use memory::MemoryStore;
pub use pg::PgStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
