//! Integration tests for webhook fan-out against local HTTP receivers.

use std::sync::Arc;
use std::time::Duration;

use abacus_core::signing::{verify_signature, SIGNATURE_HEADER};
use abacus_core::stats::{AnalysisRows, AnalysisSummary};
use abacus_db::models::analysis::{AnalysisResult, AnalysisTarget};
use abacus_db::store::WebhookStore;
use abacus_db::MemoryStore;
use abacus_events::{
    DeliveryOutcome, DispatchError, WebhookDelivery, WebhookDispatcher, WebhookPayload,
};
use assert_matches::assert_matches;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Received {
    signature: Option<String>,
    body: Vec<u8>,
}

type Inbox = Arc<Mutex<Vec<Received>>>;

async fn receive(
    State((inbox, status)): State<(Inbox, StatusCode)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    inbox.lock().await.push(Received {
        signature: headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });
    status
}

/// Start a receiver answering every POST with `status`.
async fn spawn_receiver(status: StatusCode) -> (String, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state((inbox.clone(), status));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), inbox)
}

/// A URL nothing listens on.
async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}

fn successful_result() -> AnalysisResult {
    AnalysisResult {
        target: AnalysisTarget::experiment("exp_1"),
        organization_id: "org_1".into(),
        run_started: Some(Utc::now()),
        analysis: Some(AnalysisSummary::from_rows(
            &AnalysisRows::default(),
            false,
            None,
        )),
        analysis_error: None,
        queries: Vec::new(),
    }
}

fn dispatcher(store: Arc<MemoryStore>) -> WebhookDispatcher {
    WebhookDispatcher::new(
        store,
        WebhookDelivery::new(Duration::from_secs(2)).unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_endpoint_does_not_block_the_others() {
    let store = Arc::new(MemoryStore::new());
    let (url_1, inbox_1) = spawn_receiver(StatusCode::OK).await;
    let url_2 = unreachable_url().await;
    let (url_3, inbox_3) = spawn_receiver(StatusCode::NO_CONTENT).await;

    store.create_webhook("wh_1", "org_1", "one", &url_1, "wk_one").await.unwrap();
    store.create_webhook("wh_2", "org_1", "two", &url_2, "wk_two").await.unwrap();
    store.create_webhook("wh_3", "org_1", "three", &url_3, "wk_three").await.unwrap();

    let reports = dispatcher(store.clone())
        .dispatch(&successful_result(), "org_1")
        .await
        .unwrap();

    assert_eq!(reports.len(), 3);
    assert!(reports[0].is_delivered());
    assert_matches!(reports[1].outcome, DeliveryOutcome::Failed { .. });
    assert_matches!(
        reports[2].outcome,
        DeliveryOutcome::Delivered { status_code: 204 }
    );
    assert_eq!(inbox_1.lock().await.len(), 1);
    assert_eq!(inbox_3.lock().await.len(), 1);

    let one = store.find_webhook("wh_1", "org_1").await.unwrap().unwrap();
    let two = store.find_webhook("wh_2", "org_1").await.unwrap().unwrap();
    let three = store.find_webhook("wh_3", "org_1").await.unwrap().unwrap();
    assert!(one.last_success.is_some() && one.error.is_none());
    assert!(two.last_success.is_none() && two.error.is_some());
    assert!(three.last_success.is_some() && three.error.is_none());
}

#[tokio::test]
async fn receiver_can_verify_signature() {
    let store = Arc::new(MemoryStore::new());
    let (url, inbox) = spawn_receiver(StatusCode::OK).await;
    store.create_webhook("wh_1", "org_1", "one", &url, "wk_secret").await.unwrap();

    dispatcher(store)
        .dispatch(&successful_result(), "org_1")
        .await
        .unwrap();

    let received = inbox.lock().await[0].clone();
    let signature = received.signature.expect("signature header");
    assert!(verify_signature("wk_secret", &received.body, &signature));
    assert!(!verify_signature("wk_other", &received.body, &signature));

    let payload: WebhookPayload = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(payload.target, AnalysisTarget::experiment("exp_1"));
    assert_eq!(payload.organization_id, "org_1");
}

#[tokio::test]
async fn non_2xx_response_is_recorded_and_last_success_kept() {
    let store = Arc::new(MemoryStore::new());
    let (ok_url, _) = spawn_receiver(StatusCode::OK).await;
    store.create_webhook("wh_1", "org_1", "one", &ok_url, "wk_1").await.unwrap();
    let dispatcher = dispatcher(store.clone());
    dispatcher.dispatch(&successful_result(), "org_1").await.unwrap();
    let first_success = store
        .find_webhook("wh_1", "org_1")
        .await
        .unwrap()
        .unwrap()
        .last_success;

    let (bad_url, _) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    store.create_webhook("wh_2", "org_1", "two", &bad_url, "wk_2").await.unwrap();
    store.delete_webhook("wh_1", "org_1").await.unwrap();
    let reports = dispatcher.dispatch(&successful_result(), "org_1").await.unwrap();

    assert_eq!(
        reports[0].outcome,
        DeliveryOutcome::Failed {
            error: "Webhook returned HTTP 500".into()
        }
    );
    let two = store.find_webhook("wh_2", "org_1").await.unwrap().unwrap();
    assert!(two.last_success.is_none());
    assert!(first_success.is_some());
}

#[tokio::test]
async fn other_organizations_are_not_notified() {
    let store = Arc::new(MemoryStore::new());
    let (url, inbox) = spawn_receiver(StatusCode::OK).await;
    store.create_webhook("wh_1", "org_2", "one", &url, "wk_1").await.unwrap();

    let reports = dispatcher(store)
        .dispatch(&successful_result(), "org_1")
        .await
        .unwrap();

    assert!(reports.is_empty());
    assert!(inbox.lock().await.is_empty());
}

#[tokio::test]
async fn failed_analysis_is_never_delivered() {
    let store = Arc::new(MemoryStore::new());
    let (url, inbox) = spawn_receiver(StatusCode::OK).await;
    store.create_webhook("wh_1", "org_1", "one", &url, "wk_1").await.unwrap();

    let failed = AnalysisResult {
        analysis: None,
        analysis_error: Some("relation \"events\" does not exist".into()),
        ..successful_result()
    };
    let err = dispatcher(store)
        .dispatch(&failed, "org_1")
        .await
        .unwrap_err();

    assert_matches!(err, DispatchError::NotSuccessful(_));
    assert!(inbox.lock().await.is_empty());
}
