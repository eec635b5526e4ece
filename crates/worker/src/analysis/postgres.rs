//! Postgres-compatible warehouse data source.

use std::time::Duration;

use abacus_core::stats::Row;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::datasource::{DataSource, QueryError, QueryRequest};

/// Runs analysis queries on a Postgres warehouse, returning each row as a
/// JSON object (`row_to_json`), so any result shape can be read back.
#[derive(Debug, Clone)]
pub struct PostgresDataSource {
    pool: PgPool,
}

impl PostgresDataSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a lazily-connecting pool for `url`; the first query connects.
    pub fn connect_lazy(url: &str) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DataSource for PostgresDataSource {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Row>, QueryError> {
        let sql = format!("SELECT row_to_json(q) FROM ({}) q", request.sql);
        let values = sqlx::query_scalar::<_, serde_json::Value>(&sql)
            .fetch_all(&self.pool)
            .await?;

        values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(QueryError::Failed(format!(
                    "expected a JSON object per row, got {other}"
                ))),
            })
            .collect()
    }
}
