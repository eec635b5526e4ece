use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::analysis;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/experiments/{id}/analysis",
            get(analysis::get_experiment_analysis),
        )
        .route(
            "/experiments/{id}/refresh",
            post(analysis::refresh_experiment),
        )
        .route(
            "/experiments/{id}/schedule",
            put(analysis::schedule_experiment),
        )
        .route("/metrics/{id}/analysis", get(analysis::get_metric_analysis))
        .route("/metrics/{id}/refresh", post(analysis::refresh_metric))
        .route("/metrics/{id}/schedule", put(analysis::schedule_metric))
}
