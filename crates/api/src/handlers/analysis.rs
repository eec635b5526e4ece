//! Handlers exposing analysis results and refresh scheduling for metrics
//! and experiments.

use abacus_core::error::CoreError;
use abacus_core::jobs::JobData;
use abacus_core::schedule::Schedule;
use abacus_db::models::analysis::{AnalysisTarget, TargetKind};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::webhooks::OrganizationQuery;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of the `.../schedule` endpoints. Without `schedule`, the configured
/// default refresh rule applies.
#[derive(Debug, Deserialize)]
pub struct RefreshSchedule {
    pub organization_id: String,
    pub schedule: Option<String>,
}

fn refresh_job(kind: TargetKind, id: &str, organization_id: &str) -> JobData {
    match kind {
        TargetKind::Experiment => JobData::update_experiment_results(id, organization_id),
        TargetKind::Metric => JobData::update_metrics(id, organization_id),
    }
}

async fn get_analysis(
    state: AppState,
    target: AnalysisTarget,
    organization_id: &str,
) -> AppResult<impl IntoResponse> {
    let result = state
        .stores
        .analysis
        .find_result(&target, organization_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Analysis",
            id: target.id.clone(),
        })?;
    Ok(Json(DataResponse { data: result }))
}

async fn refresh_now(
    state: AppState,
    kind: TargetKind,
    id: &str,
    organization_id: &str,
) -> AppResult<impl IntoResponse> {
    let job = state.queue.now(&refresh_job(kind, id, organization_id)).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

async fn schedule_refresh(
    state: AppState,
    kind: TargetKind,
    id: &str,
    input: RefreshSchedule,
) -> AppResult<impl IntoResponse> {
    let expression = input.schedule.unwrap_or_else(|| match kind {
        TargetKind::Experiment => state.config.experiment_refresh_schedule.clone(),
        TargetKind::Metric => state.config.metric_refresh_schedule.clone(),
    });
    let schedule = Schedule::parse(&expression)?;
    let job = state
        .queue
        .every(&refresh_job(kind, id, &input.organization_id), schedule)
        .await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/experiments/{id}/analysis?organization_id=
pub async fn get_experiment_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<impl IntoResponse> {
    get_analysis(state, AnalysisTarget::experiment(&id), &query.organization_id).await
}

/// GET /api/v1/metrics/{id}/analysis?organization_id=
pub async fn get_metric_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<impl IntoResponse> {
    get_analysis(state, AnalysisTarget::metric(&id), &query.organization_id).await
}

/// POST /api/v1/experiments/{id}/refresh?organization_id=
pub async fn refresh_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<impl IntoResponse> {
    refresh_now(state, TargetKind::Experiment, &id, &query.organization_id).await
}

/// POST /api/v1/metrics/{id}/refresh?organization_id=
pub async fn refresh_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<impl IntoResponse> {
    refresh_now(state, TargetKind::Metric, &id, &query.organization_id).await
}

/// PUT /api/v1/experiments/{id}/schedule
pub async fn schedule_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<RefreshSchedule>,
) -> AppResult<impl IntoResponse> {
    schedule_refresh(state, TargetKind::Experiment, &id, input).await
}

/// PUT /api/v1/metrics/{id}/schedule
pub async fn schedule_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<RefreshSchedule>,
) -> AppResult<impl IntoResponse> {
    schedule_refresh(state, TargetKind::Metric, &id, input).await
}
