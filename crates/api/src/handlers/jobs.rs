//! Handlers for the `/jobs` resource: the job trigger surface.

use abacus_core::error::CoreError;
use abacus_core::jobs::JobData;
use abacus_core::schedule::{Schedule, Trigger};
use abacus_core::types::{DbId, Timestamp};
use abacus_db::models::job::JobListQuery;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /jobs`.
///
/// `schedule` registers (or updates) a recurrence; `at` runs once at that
/// time; neither runs once now.
#[derive(Debug, Deserialize)]
pub struct ScheduleJob {
    pub name: String,
    pub data: serde_json::Value,
    pub schedule: Option<String>,
    pub at: Option<Timestamp>,
}

/// POST /api/v1/jobs
pub async fn schedule_job(
    State(state): State<AppState>,
    Json(input): Json<ScheduleJob>,
) -> AppResult<impl IntoResponse> {
    let data = JobData::from_parts(&input.name, input.data)?;
    let trigger = match (input.schedule.as_deref(), input.at) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "Provide either 'schedule' or 'at', not both".into(),
            ))
        }
        (Some(expression), None) => Trigger::Every(Schedule::parse(expression)?),
        (None, Some(at)) => Trigger::At(at),
        (None, None) => Trigger::At(Utc::now()),
    };

    let job = state.queue.submit(&data, &trigger).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.stores.jobs.list_jobs(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .stores
        .jobs
        .find_job(id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })?;
    Ok(Json(DataResponse { data: job }))
}
