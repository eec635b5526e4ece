pub mod analysis;
pub mod health;
pub mod jobs;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                                  list, schedule
/// /jobs/{id}                             get
///
/// /webhooks                              list, create
/// /webhooks/{id}                         delete
///
/// /experiments/{id}/analysis             latest result
/// /experiments/{id}/refresh              run once now (POST)
/// /experiments/{id}/schedule             register recurrence (PUT)
/// /metrics/{id}/analysis                 latest result
/// /metrics/{id}/refresh                  run once now (POST)
/// /metrics/{id}/schedule                 register recurrence (PUT)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/webhooks", webhooks::router())
        .merge(analysis::router())
}
