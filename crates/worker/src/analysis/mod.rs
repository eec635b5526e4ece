//! Analysis runner and the external data-source boundary.

pub mod datasource;
pub mod postgres;
pub mod query;
pub mod runner;

pub use datasource::{DataSource, DataSourceRegistry, QueryError, QueryRequest};
pub use postgres::PostgresDataSource;
pub use query::{QueryPlan, QueryPurpose};
pub use runner::{AnalysisRunner, RunnerError};
