use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::engine::node::NodeError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Base URL from `var` when set, so tests can point a node at a stub server.
pub(crate) fn api_base(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .map(|raw| raw.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn error_detail(parsed: Option<&Value>, body: &str) -> Option<String> {
    let from_json = parsed.and_then(|v| {
        v.get("error")
            .and_then(|err| err.get("message"))
            .and_then(|m| m.as_str())
            .or_else(|| v.get("error_description").and_then(|m| m.as_str()))
            .or_else(|| v.get("error").and_then(|m| m.as_str()))
            .or_else(|| v.get("message").and_then(|m| m.as_str()))
            .or_else(|| {
                v.get("errors")
                    .and_then(|e| e.get(0))
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            })
            .map(|s| s.to_string())
    });
    from_json.or_else(|| {
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Clone)]
pub(crate) struct OutboundResponse {
    pub status: u16,
    pub body: Value,
}

/// Sends the request and reads the body as JSON (or a string when it is not
/// JSON). Non-2xx statuses become [`NodeError::Integration`].
pub(crate) async fn send(service: &str, request: RequestBuilder) -> Result<OutboundResponse, NodeError> {
    let response = request
        .send()
        .await
        .map_err(|e| NodeError::integration(service, format!("request failed: {e}")))?;

    let status = response.status();
    let body_text = response
        .text()
        .await
        .map_err(|e| NodeError::integration(service, format!("response read failed: {e}")))?;
    let parsed: Option<Value> = serde_json::from_str(&body_text).ok();

    if !status.is_success() {
        let message = match error_detail(parsed.as_ref(), &body_text) {
            Some(detail) => format!("status {}: {}", status.as_u16(), detail),
            None => format!("status {}", status.as_u16()),
        };
        return Err(NodeError::integration(service, message));
    }

    let body = parsed.unwrap_or_else(|| {
        let trimmed = body_text.trim();
        if trimmed.is_empty() {
            Value::Null
        } else {
            Value::String(trimmed.to_string())
        }
    });
    Ok(OutboundResponse {
        status: status.as_u16(),
        body,
    })
}

/// Webhook URLs must be absolute http(s) URLs.
pub(crate) fn parse_webhook_url(raw: &str, service: &str) -> Result<reqwest::Url, NodeError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|_| NodeError::integration(service, "invalid webhook URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(NodeError::integration(
            service,
            "webhook URL must be HTTP or HTTPS",
        )),
    }
}
