pub mod runs;
pub mod workflows;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/workflows/{workflow_id}/run", post(workflows::run_workflow))
        .route(
            "/api/workflows/{workflow_id}/runs",
            get(workflows::list_workflow_runs),
        )
        .route("/api/runs/events", get(runs::stream_events))
        .route("/api/runs/{run_id}", get(runs::get_run))
        .with_state(state)
}
