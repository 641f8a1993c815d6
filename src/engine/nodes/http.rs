use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::templating::{render, render_value};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    #[serde(default)]
    pub url: String,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
}

impl HttpRequestConfig {
    fn method(&self) -> Result<Method, ValidationError> {
        let raw = self
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        Method::from_bytes(raw.as_bytes())
            .map_err(|_| ValidationError::new("method", format!("Unsupported HTTP method {raw}")))
    }
}

fn is_ip_blocked(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            a == 127
                || a == 10
                || (a == 172 && (16..=31).contains(&b))
                || (a == 192 && b == 168)
                || (a == 169 && b == 254)
                || *v4 == Ipv4Addr::UNSPECIFIED
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            *v6 == Ipv6Addr::LOCALHOST
                || (seg0 & 0xfe00) == 0xfc00
                || (seg0 & 0xffc0) == 0xfe80
        }
    }
}

fn is_production() -> bool {
    std::env::var("ENV")
        .map(|v| v.trim().eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

#[derive(Default)]
pub struct HttpRequestNode {
    config: NodeConfig<HttpRequestConfig>,
}

#[async_trait]
impl WorkflowNode for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http-request"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.url.trim().is_empty() {
            return Err(ValidationError::required("url", "HTTP url"));
        }
        config.method()?;
        if config.timeout_ms == Some(0) {
            return Err(ValidationError::new("timeoutMs", "Timeout must be positive"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let method = config.method()?;

        let url = render(&config.url, &template_ctx);
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| NodeError::Other(format!("Invalid HTTP url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NodeError::Other(
                "Only http/https schemes are allowed".to_string(),
            ));
        }
        if let Some(ip) = parsed.host_str().and_then(|h| {
            h.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .ok()
        }) {
            if is_production() && is_ip_blocked(&ip) {
                warn!(node_id = %ctx.node_id, host = %ip, "blocked outbound HTTP to private address");
                return Err(NodeError::Other(
                    "Outbound HTTP to private addresses is blocked".to_string(),
                ));
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let rendered = render(value, &template_ctx);
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(&rendered),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(node_id = %ctx.node_id, header = %name, "skipping invalid header"),
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(
                config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ))
            .build()?;
        let mut request = client.request(method.clone(), parsed).headers(headers);
        if let Some(body) = &config.body {
            request = match render_value(body, &template_ctx) {
                Value::String(text) => request.body(text),
                other => request.json(&other),
            };
        }

        let response = request.send().await?;
        let status = response.status();
        let body_text = response.text().await?;
        let body = serde_json::from_str::<Value>(&body_text)
            .unwrap_or_else(|_| Value::String(body_text.clone()));

        if !status.is_success() {
            return Err(NodeError::Other(format!(
                "HTTP {} {} returned status {}",
                method,
                url.trim(),
                status.as_u16()
            )));
        }

        Ok(NodeOutput::executed(json!({
            "status": status.as_u16(),
            "body": body,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::{test_context, InputSnapshot};
    use crate::engine::nodes::test_support::{json_response, spawn_stub_server, EnvGuard};
    use axum::http::StatusCode;

    #[test]
    fn url_is_required_and_method_must_parse() {
        let node = HttpRequestNode::default();
        assert_eq!(node.validate().expect_err("no url").field, "url");

        let mut node = HttpRequestNode::default();
        node.configure(&json!({"url": "https://example.com", "method": "not a method"}));
        assert_eq!(node.validate().expect_err("bad method").field, "method");
    }

    #[test]
    fn private_ranges_are_blocked() {
        assert!(is_ip_blocked(&"10.0.0.5".parse().unwrap()));
        assert!(is_ip_blocked(&"192.168.1.1".parse().unwrap()));
        assert!(is_ip_blocked(&"::1".parse().unwrap()));
        assert!(!is_ip_blocked(&"8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn sends_templated_request_and_returns_json() {
        let _env = EnvGuard::set("ENV", "test");
        let (addr, mut rx, handle) =
            spawn_stub_server(|| json_response(StatusCode::OK, json!({"ok": true}))).await;

        let mut node = HttpRequestNode::default();
        node.configure(&json!({
            "url": format!("http://{addr}/items/{{{{trigger.id}}}}"),
            "method": "post",
            "headers": {"x-run": "{{trigger.id}}"},
            "body": {"name": "{{trigger.name}}"}
        }));
        assert!(node.validate().is_ok());

        let mut ctx = test_context(None);
        ctx.input = InputSnapshot::new(json!({"id": 42, "name": "widget"}));
        let output = node.execute(&ctx).await.expect("request succeeds");

        assert_eq!(output.data, json!({"status": 200, "body": {"ok": true}}));
        let recorded = rx.recv().await.expect("request recorded");
        assert_eq!(recorded.method, "POST");
        assert_eq!(recorded.uri, "/items/42");
        assert_eq!(recorded.header("x-run"), Some("42"));
        assert_eq!(recorded.json(), json!({"name": "widget"}));
        handle.abort();
    }

    #[tokio::test]
    async fn non_success_status_fails() {
        let _env = EnvGuard::set("ENV", "test");
        let (addr, _rx, handle) =
            spawn_stub_server(|| json_response(StatusCode::BAD_GATEWAY, json!({}))).await;

        let mut node = HttpRequestNode::default();
        node.configure(&json!({"url": format!("http://{addr}/down")}));
        let err = node
            .execute(&test_context(None))
            .await
            .expect_err("502 fails the node");
        assert!(err.to_string().contains("502"));
        handle.abort();
    }

    #[tokio::test]
    async fn production_blocks_loopback() {
        let _env = EnvGuard::set("ENV", "production");
        let mut node = HttpRequestNode::default();
        node.configure(&json!({"url": "http://127.0.0.1:9/secret"}));
        let err = node
            .execute(&test_context(None))
            .await
            .expect_err("loopback blocked");
        assert!(err.to_string().contains("blocked"));
    }
}
