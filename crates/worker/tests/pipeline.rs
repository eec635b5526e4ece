//! End-to-end runs of the three job kinds against in-memory stores.

mod common;

use std::sync::Arc;
use std::time::Duration;

use abacus_core::jobs::{JobData, WEBHOOKS};
use abacus_core::scheduling::RunState;
use abacus_core::signing::{generate_signing_key, verify_signature};
use abacus_core::stats::Row;
use abacus_core::types::Timestamp;
use abacus_db::models::analysis::AnalysisTarget;
use abacus_db::store::{AnalysisStore, WebhookStore};
use abacus_db::MemoryStore;
use abacus_events::WebhookPayload;
use abacus_worker::analysis::{
    AnalysisRunner, DataSource, DataSourceRegistry, QueryError, QueryRequest, RunnerError,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use common::{pipeline, seeded_store, spawn_receiver, unreachable_url, ScriptedSource};

async fn register(store: &abacus_db::MemoryStore, id: &str, org: &str, url: &str) -> String {
    let key = generate_signing_key();
    store.create_webhook(id, org, id, url, &key).await.unwrap();
    key
}

// ---------------------------------------------------------------------------
// Experiment scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn experiment_update_stores_result_then_notifies_each_org_endpoint() {
    let store = seeded_store().await;
    let source =
        Arc::new(ScriptedSource::new().rows("totals", vec![json!({"count": 100, "sum": 40})]));
    let pipeline = pipeline(store.clone(), source);

    let (url_a, inbox_a) = spawn_receiver().await;
    let (url_b, inbox_b) = spawn_receiver().await;
    let (url_other, inbox_other) = spawn_receiver().await;
    let key_a = register(&store, "wh_a", "org_1", &url_a).await;
    register(&store, "wh_b", "org_1", &url_b).await;
    register(&store, "wh_other", "org_2", &url_other).await;

    pipeline
        .scheduler
        .queue()
        .now(&JobData::update_experiment_results("exp_1", "org_1"))
        .await
        .unwrap();

    let reports = pipeline.scheduler.run_due_once().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, RunState::Succeeded);

    let result = store
        .find_result(&AnalysisTarget::experiment("exp_1"), "org_1")
        .await
        .unwrap()
        .unwrap();
    let analysis = result.analysis.as_ref().unwrap();
    assert_eq!(analysis.users, 100);
    assert_eq!(analysis.average, 0.4);
    assert!(result.analysis_error.is_none());

    // The webhooks job is queued by the successful analysis.
    let reports = pipeline.scheduler.run_due_once().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].job_name, WEBHOOKS);
    assert_eq!(reports[0].state, RunState::Succeeded);

    let received_a = inbox_a.lock().await;
    assert_eq!(received_a.len(), 1);
    assert_eq!(inbox_b.lock().await.len(), 1);
    assert!(inbox_other.lock().await.is_empty());

    let delivery = &received_a[0];
    let signature = delivery.signature.as_deref().unwrap();
    assert!(verify_signature(&key_a, &delivery.body, signature));
    let payload: WebhookPayload = serde_json::from_slice(&delivery.body).unwrap();
    assert_eq!(payload.organization_id, "org_1");
    assert_eq!(payload.analysis.users, 100);

    // Nothing else is due.
    assert!(pipeline.scheduler.run_due_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_analysis_never_reaches_webhooks() {
    let store = seeded_store().await;
    let source = Arc::new(ScriptedSource::new().fail("totals", "connection reset by warehouse"));
    let pipeline = pipeline(store.clone(), source);
    let (url, inbox) = spawn_receiver().await;
    register(&store, "wh_a", "org_1", &url).await;

    pipeline
        .scheduler
        .queue()
        .now(&JobData::update_experiment_results("exp_1", "org_1"))
        .await
        .unwrap();
    let reports = pipeline.scheduler.run_due_once().await.unwrap();

    assert_eq!(reports[0].state, RunState::Failed);
    let error = reports[0].error.as_deref().unwrap();
    assert!(error.contains("totals query failed"), "{error}");

    let result = store
        .find_result(&AnalysisTarget::experiment("exp_1"), "org_1")
        .await
        .unwrap()
        .unwrap();
    assert!(result.analysis.is_none());
    assert_eq!(result.analysis_error.as_deref(), Some(error));

    assert!(store.all_jobs().await.iter().all(|job| job.name != WEBHOOKS));
    assert!(pipeline.scheduler.run_due_once().await.unwrap().is_empty());
    assert!(inbox.lock().await.is_empty());
}

#[tokio::test]
async fn webhooks_job_skips_a_failed_result() {
    let store = seeded_store().await;
    let source = Arc::new(ScriptedSource::new().fail("totals", "syntax error"));
    let pipeline = pipeline(store.clone(), source);
    let (url, inbox) = spawn_receiver().await;
    register(&store, "wh_a", "org_1", &url).await;

    pipeline
        .runner
        .run(&AnalysisTarget::experiment("exp_1"), "org_1")
        .await
        .unwrap();
    pipeline
        .scheduler
        .queue()
        .now(&JobData::webhooks("exp_1", "org_1"))
        .await
        .unwrap();
    let reports = pipeline.scheduler.run_due_once().await.unwrap();

    assert_eq!(reports[0].state, RunState::Succeeded);
    assert!(inbox.lock().await.is_empty());
}

// ---------------------------------------------------------------------------
// Analysis properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rerunning_with_unchanged_data_is_byte_identical() {
    let store = seeded_store().await;
    let source = Arc::new(
        ScriptedSource::new()
            .rows(
                "totals",
                vec![
                    json!({"variation": "0", "count": 50, "sum": 10}),
                    json!({"variation": "1", "count": 50, "sum": 15}),
                ],
            )
            .rows(
                "dates",
                vec![json!({"date": "2024-01-02", "count": 100, "sum": 25})],
            ),
    );
    let pipeline = pipeline(store, source);
    let target = AnalysisTarget::experiment("exp_1");

    let first = pipeline.runner.run(&target, "org_1").await.unwrap();
    let second = pipeline.runner.run(&target, "org_1").await.unwrap();

    let first = serde_json::to_vec(first.analysis.as_ref().unwrap()).unwrap();
    let second = serde_json::to_vec(second.analysis.as_ref().unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn zero_users_store_finite_zeros() {
    let store = seeded_store().await;
    let source =
        Arc::new(ScriptedSource::new().rows("totals", vec![json!({"count": 0, "sum": 0})]));
    let pipeline = pipeline(store.clone(), source);

    pipeline
        .scheduler
        .queue()
        .now(&JobData::update_metrics("met_1", "org_1"))
        .await
        .unwrap();
    let reports = pipeline.scheduler.run_due_once().await.unwrap();
    assert_eq!(reports[0].state, RunState::Succeeded);

    let result = store
        .find_result(&AnalysisTarget::metric("met_1"), "org_1")
        .await
        .unwrap()
        .unwrap();
    let analysis = result.analysis.unwrap();
    assert_eq!(analysis.users, 0);
    assert_eq!(analysis.average, 0.0);
    assert_eq!(analysis.stddev, 0.0);
}

#[tokio::test]
async fn every_query_is_recorded_even_when_one_fails() {
    let store = seeded_store().await;
    let source = Arc::new(
        ScriptedSource::new()
            .rows("totals", vec![json!({"count": 10, "sum": 4})])
            .fail("dates", "permission denied"),
    );
    let pipeline = pipeline(store, source.clone());

    let result = pipeline
        .runner
        .run(&AnalysisTarget::experiment("exp_1"), "org_1")
        .await
        .unwrap();

    assert_eq!(source.calls(), 2);
    assert_eq!(result.queries.len(), 2);
    assert_eq!(
        result.analysis_error.as_deref(),
        Some("dates query failed: permission denied")
    );
    let failed: Vec<_> = result
        .queries
        .iter()
        .filter(|q| q.error.is_some())
        .map(|q| q.name.as_str())
        .collect();
    assert_eq!(failed, ["dates"]);
}

/// Starts a newer run of the same target while its own query is in flight,
/// as a second worker would after this one's lease expired.
struct Overtaken {
    store: Arc<MemoryStore>,
    newer_run: Timestamp,
}

#[async_trait]
impl DataSource for Overtaken {
    async fn query(&self, _request: &QueryRequest) -> Result<Vec<Row>, QueryError> {
        self.store
            .mark_run_started(&AnalysisTarget::experiment("exp_1"), "org_1", self.newer_run)
            .await
            .map_err(|e| QueryError::Failed(e.to_string()))?;
        Ok(vec![common::row(json!({"count": 100, "sum": 40}))])
    }
}

#[tokio::test]
async fn late_result_from_an_overtaken_run_is_discarded() {
    let store = seeded_store().await;
    let newer_run = Utc::now() + chrono::Duration::hours(1);
    let mut sources = DataSourceRegistry::new();
    sources.register(
        common::WAREHOUSE,
        Arc::new(Overtaken {
            store: store.clone(),
            newer_run,
        }),
    );
    let runner = AnalysisRunner::new(
        store.clone(),
        store.clone(),
        Arc::new(sources),
        Duration::from_secs(2),
    );
    let target = AnalysisTarget::experiment("exp_1");

    let outcome = runner.run(&target, "org_1").await;

    assert_matches!(outcome, Err(RunnerError::Superseded(t)) if t == target);
    let stored = store.find_result(&target, "org_1").await.unwrap().unwrap();
    assert_eq!(stored.run_started, Some(newer_run));
    assert!(stored.analysis.is_none());
    assert!(stored.analysis_error.is_none());
    assert!(stored.queries.is_empty());
}

// ---------------------------------------------------------------------------
// Delivery isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_unreachable_endpoint_does_not_block_the_others() {
    let store = seeded_store().await;
    let source =
        Arc::new(ScriptedSource::new().rows("totals", vec![json!({"count": 100, "sum": 40})]));
    let pipeline = pipeline(store.clone(), source);

    let (url_1, inbox_1) = spawn_receiver().await;
    let url_2 = unreachable_url().await;
    let (url_3, inbox_3) = spawn_receiver().await;
    register(&store, "wh_1", "org_1", &url_1).await;
    register(&store, "wh_2", "org_1", &url_2).await;
    register(&store, "wh_3", "org_1", &url_3).await;

    let result = pipeline
        .runner
        .run(&AnalysisTarget::experiment("exp_1"), "org_1")
        .await
        .unwrap();
    let reports = pipeline.dispatcher.dispatch(&result, "org_1").await.unwrap();

    assert_eq!(reports.len(), 3);
    assert_eq!(inbox_1.lock().await.len(), 1);
    assert_eq!(inbox_3.lock().await.len(), 1);

    let endpoint = |id: &'static str| {
        let store = store.clone();
        async move { store.find_webhook(id, "org_1").await.unwrap().unwrap() }
    };
    let first = endpoint("wh_1").await;
    let second = endpoint("wh_2").await;
    let third = endpoint("wh_3").await;
    assert!(first.last_success.is_some() && first.error.is_none());
    assert!(third.last_success.is_some() && third.error.is_none());
    assert!(second.last_success.is_none());
    assert!(second.error.is_some());
}
