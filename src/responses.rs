use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    fn error(status: StatusCode, msg: &str) -> Response {
        (
            status,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
            }),
        )
            .into_response()
    }

    pub fn not_found(msg: &str) -> Response {
        Self::error(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: &str) -> Response {
        Self::error(StatusCode::BAD_REQUEST, msg)
    }

    pub fn server_error(msg: &str) -> Response {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}
