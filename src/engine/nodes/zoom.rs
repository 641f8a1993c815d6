use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use urlencoding::encode;

use crate::engine::integrations::keys;
use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::nodes::outbound::{self, api_base};
use crate::engine::templating::render;

const DEFAULT_ZOOM_API_BASE: &str = "https://api.zoom.us/v2";
const DEFAULT_ZOOM_OAUTH_BASE: &str = "https://zoom.us";
const DEFAULT_DURATION_MINUTES: u32 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomMeetingConfig {
    #[serde(default)]
    pub topic: String,
    pub start_time: Option<String>,
    pub duration_minutes: Option<u32>,
    pub timezone: Option<String>,
    pub agenda: Option<String>,
}

#[derive(Default)]
pub struct ZoomMeetingNode {
    config: NodeConfig<ZoomMeetingConfig>,
}

/// A ready token, or one minted through the server-to-server OAuth app.
/// `None` when neither is available.
async fn zoom_access_token(ctx: &ExecutionContext) -> Result<Option<String>, NodeError> {
    if let Some(token) = ctx.credential(keys::ZOOM_ACCESS_TOKEN) {
        return Ok(Some(token));
    }
    let (Some(account_id), Some(client_id), Some(client_secret)) = (
        ctx.credential(keys::ZOOM_ACCOUNT_ID),
        ctx.credential(keys::ZOOM_CLIENT_ID),
        ctx.credential(keys::ZOOM_CLIENT_SECRET),
    ) else {
        return Ok(None);
    };

    let url = format!(
        "{}/oauth/token?grant_type=account_credentials&account_id={}",
        api_base("ZOOM_OAUTH_BASE", DEFAULT_ZOOM_OAUTH_BASE),
        encode(&account_id)
    );
    let response = outbound::send(
        "Zoom",
        outbound::client()
            .post(url)
            .basic_auth(client_id, Some(client_secret)),
    )
    .await?;
    response
        .body
        .get("access_token")
        .and_then(|t| t.as_str())
        .map(|t| Some(t.to_string()))
        .ok_or_else(|| NodeError::integration("Zoom", "token response missing access_token"))
}

#[async_trait]
impl WorkflowNode for ZoomMeetingNode {
    fn node_type(&self) -> &str {
        "zoom-meeting"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.topic.trim().is_empty() {
            return Err(ValidationError::required("topic", "Meeting topic"));
        }
        if config.duration_minutes == Some(0) {
            return Err(ValidationError::new(
                "durationMinutes",
                "Meeting duration must be positive",
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();

        let mut meeting = json!({
            "topic": render(&config.topic, &template_ctx),
            "duration": config.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
        });
        match config.start_time.as_deref().map(|s| render(s, &template_ctx)) {
            Some(start) if !start.trim().is_empty() => {
                meeting["type"] = json!(2);
                meeting["start_time"] = json!(start.trim());
            }
            _ => meeting["type"] = json!(1),
        }
        if let Some(tz) = config.timezone.as_deref().filter(|s| !s.trim().is_empty()) {
            meeting["timezone"] = json!(tz);
        }
        if let Some(agenda) = &config.agenda {
            meeting["agenda"] = json!(render(agenda, &template_ctx));
        }

        let Some(token) = zoom_access_token(ctx).await? else {
            return Ok(NodeOutput::simulated(json!({
                "service": "Zoom",
                "meeting": meeting,
            })));
        };

        let url = format!(
            "{}/users/me/meetings",
            api_base("ZOOM_API_BASE", DEFAULT_ZOOM_API_BASE)
        );
        let response = outbound::send(
            "Zoom",
            outbound::client().post(url).bearer_auth(token).json(&meeting),
        )
        .await?;

        Ok(NodeOutput::executed(json!({
            "created": true,
            "service": "Zoom",
            "meetingId": response.body.get("id").cloned().unwrap_or(Value::Null),
            "joinUrl": response.body.get("join_url").cloned().unwrap_or(Value::Null),
        })))
    }
}
