//! Pluggable query execution against external warehouses.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use abacus_core::stats::Row;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown data source '{0}'")]
    UnknownDataSource(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Failed(String),
}

/// One query of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Stable name of the query within a run (`totals`, `dates`, ...).
    pub name: String,
    pub sql: String,
}

/// A warehouse that turns a [`QueryRequest`] into tabular rows.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Row>, QueryError>;
}

/// Data sources by the name metric and experiment definitions refer to.
#[derive(Default, Clone)]
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn DataSource>) -> &mut Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataSource>, QueryError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownDataSource(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
