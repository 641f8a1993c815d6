use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use serde_json::json;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};
use uuid::Uuid;

use crate::responses::JsonResponse;
use crate::state::AppState;

pub async fn get_run(State(app_state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match app_state.workflow_repo.get_workflow_run(run_id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(json!({ "success": true, "run": run }))).into_response(),
        Ok(None) => JsonResponse::not_found("Run not found"),
        Err(err) => {
            error!(%run_id, error = %err, "failed to fetch workflow run");
            JsonResponse::server_error("Failed to fetch run")
        }
    }
}

/// Live feed of run events and notifications for every run in the process.
pub async fn stream_events(
    State(app_state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events = BroadcastStream::new(app_state.events.subscribe());

    let s = stream! {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(ev) => yield Ok::<Event, Infallible>(ev),
                    Err(err) => warn!(error = %err, "failed to encode engine event"),
                },
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream subscriber lagged, events dropped");
                }
            }
        }
    };

    Sse::new(s).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tokio_stream::StreamExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::mock_db::MockDb;
    use crate::routes::router;
    use crate::state::test_state;

    fn get(uri: String) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn returns_a_finished_run_with_its_log() {
        let db = Arc::new(MockDb::default());
        let workflow = db.insert_workflow(
            Uuid::new_v4(),
            json!([{"id": "start", "type": "trigger", "data": {}}]),
        );
        let state = test_state(db);
        let run_id = state
            .executor
            .execute(workflow.id, Some(json!({"a": 1})), None)
            .await
            .expect("run");

        let response = router(state)
            .oneshot(get(format!("/api/runs/{run_id}")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["run"]["status"], "SUCCESS");
        assert_eq!(body["run"]["logs"][0]["nodeId"], "start");
        assert_eq!(body["run"]["logs"][0]["output"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn unknown_run_is_404() {
        let app = router(test_state(Arc::new(MockDb::default())));

        let response = app
            .oneshot(get(format!("/api/runs/{}", Uuid::new_v4())))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn event_stream_forwards_run_events() {
        let db = Arc::new(MockDb::default());
        let workflow = db.insert_workflow(Uuid::new_v4(), json!([]));
        let state = test_state(db);
        let executor = state.executor.clone();

        let response = router(state)
            .oneshot(get("/api/runs/events".to_string()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        executor
            .execute(workflow.id, None, None)
            .await
            .expect("run");

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(std::time::Duration::from_secs(2), body.next())
            .await
            .expect("event in time")
            .expect("chunk")
            .expect("chunk ok");
        let text = String::from_utf8(chunk.to_vec()).expect("utf8");
        assert!(text.starts_with("event: run"), "unexpected frame {text}");
        assert!(text.contains("\"run_started\""));
    }
}
