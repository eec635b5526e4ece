//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abacus_core::signing::SIGNATURE_HEADER;
use abacus_core::stats::Row;
use abacus_db::models::definition::{ExperimentDefinition, MetricDefinition, MetricType};
use abacus_db::store::Stores;
use abacus_db::MemoryStore;
use abacus_worker::analysis::{DataSource, DataSourceRegistry, QueryError, QueryRequest};
use abacus_worker::{Pipeline, WorkerConfig};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

pub const WAREHOUSE: &str = "warehouse";

// ---------------------------------------------------------------------------
// Scripted data source
// ---------------------------------------------------------------------------

/// Answers each query by name with a canned result. Unscripted queries
/// return no rows.
#[derive(Default)]
pub struct ScriptedSource {
    responses: std::sync::Mutex<HashMap<String, Result<Vec<Row>, String>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(self, name: &str, rows: Vec<serde_json::Value>) -> Self {
        let rows = rows.into_iter().map(row).collect();
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), Ok(rows));
        self
    }

    pub fn fail(self, name: &str, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Row>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(&request.name) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(message)) => Err(QueryError::Failed(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Definitions and wiring
// ---------------------------------------------------------------------------

pub fn metric(id: &str, organization: &str) -> MetricDefinition {
    MetricDefinition {
        id: id.into(),
        organization: organization.into(),
        datasource: WAREHOUSE.into(),
        name: "Purchased".into(),
        metric_type: MetricType::Binomial,
        sql: None,
        table: Some("purchases".into()),
        column: None,
        user_id_column: None,
        timestamp_column: None,
        cap: None,
        ignore_nulls: false,
        segment: None,
    }
}

pub fn experiment(id: &str, organization: &str, metric_id: &str) -> ExperimentDefinition {
    ExperimentDefinition {
        id: id.into(),
        organization: organization.into(),
        datasource: WAREHOUSE.into(),
        name: "Checkout redesign".into(),
        tracking_key: format!("{id}-key"),
        metric_id: metric_id.into(),
        start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        end_date: None,
    }
}

/// A store holding `exp_1` / `met_1` for `org_1`.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_metric(metric("met_1", "org_1")).await;
    store
        .insert_experiment(experiment("exp_1", "org_1", "met_1"))
        .await;
    store
}

pub fn config() -> WorkerConfig {
    WorkerConfig {
        database_url: "postgres://unused".into(),
        poll_interval: Duration::from_millis(20),
        worker_slots: 8,
        batch_size: 50,
        default_lock_limit: 5,
        lock_ttl: Duration::from_secs(60),
        job_timeout: Duration::from_secs(5),
        query_timeout: Duration::from_secs(2),
        webhook_timeout: Duration::from_secs(2),
        warehouses: Vec::new(),
        metrics_config_path: None::<PathBuf>,
        finished_job_retention: Duration::from_secs(3600),
        instance_id: "test-worker".into(),
    }
}

pub fn pipeline(store: Arc<MemoryStore>, source: Arc<ScriptedSource>) -> Pipeline {
    let mut sources = DataSourceRegistry::new();
    sources.register(WAREHOUSE, source);
    Pipeline::build(&config(), Stores::shared(store), sources).unwrap()
}

// ---------------------------------------------------------------------------
// Webhook receivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Received {
    pub signature: Option<String>,
    pub body: Vec<u8>,
}

pub type Inbox = Arc<Mutex<Vec<Received>>>;

async fn receive(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> StatusCode {
    inbox.lock().await.push(Received {
        signature: headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });
    StatusCode::OK
}

/// Start a receiver answering every POST with 200.
pub async fn spawn_receiver() -> (String, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(inbox.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), inbox)
}

/// A URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}
