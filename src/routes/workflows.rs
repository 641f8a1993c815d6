use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::engine::ExecutorError;
use crate::responses::JsonResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowRequest {
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub acting_user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RunHistoryQuery {
    pub limit: Option<i64>,
}

pub async fn run_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    body: Option<Json<RunWorkflowRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    if matches!(&request.payload, Some(p) if !p.is_object() && !p.is_null()) {
        return JsonResponse::bad_request("payload must be a JSON object");
    }

    match app_state
        .executor
        .start(workflow_id, request.payload, request.acting_user_id)
        .await
    {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "runId": run_id })),
        )
            .into_response(),
        Err(ExecutorError::NotFound { .. }) => JsonResponse::not_found("Workflow not found"),
        Err(err) => {
            error!(%workflow_id, error = %err, "failed to start workflow run");
            JsonResponse::server_error("Failed to start run")
        }
    }
}

pub async fn list_workflow_runs(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Query(params): Query<RunHistoryQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);

    match app_state.workflow_repo.find_workflow_by_id(workflow_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return JsonResponse::not_found("Workflow not found"),
        Err(err) => {
            error!(%workflow_id, error = %err, "failed to load workflow");
            return JsonResponse::server_error("Failed to list runs");
        }
    }

    match app_state
        .workflow_repo
        .list_runs_for_workflow(workflow_id, limit)
        .await
    {
        Ok(runs) => (StatusCode::OK, Json(json!({ "success": true, "runs": runs }))).into_response(),
        Err(err) => {
            error!(%workflow_id, error = %err, "failed to list workflow runs");
            JsonResponse::server_error("Failed to list runs")
        }
    }
}
