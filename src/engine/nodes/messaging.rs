use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use urlencoding::encode;

use crate::engine::integrations::keys;
use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::nodes::outbound::{self, api_base, error_detail, parse_webhook_url};
use crate::engine::templating::render;

const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
const DEFAULT_MICROSOFT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Posts to Slack through the incoming webhook when one is configured,
/// otherwise through `chat.postMessage` with the bot token.
pub(crate) async fn post_slack(
    ctx: &ExecutionContext,
    channel: Option<&str>,
    text: &str,
) -> Result<Value, NodeError> {
    let channel = channel.map(str::trim).filter(|c| !c.is_empty());

    if let Some(webhook) = ctx.credential(keys::SLACK_WEBHOOK_URL) {
        let url = parse_webhook_url(&webhook, "Slack")?;
        let mut payload = json!({ "text": text });
        if let Some(channel) = channel {
            payload["channel"] = Value::String(channel.to_string());
        }
        let response = outbound::send("Slack", outbound::client().post(url).json(&payload)).await?;
        return Ok(json!({
            "sent": true,
            "service": "Slack",
            "via": "webhook",
            "status": response.status,
        }));
    }

    let token = ctx
        .credential(keys::SLACK_BOT_TOKEN)
        .ok_or_else(|| NodeError::NotConfigured("Slack".to_string()))?;
    let channel = channel.ok_or_else(|| ValidationError::required("channel", "Slack channel"))?;

    let url = format!("{}/chat.postMessage", api_base("SLACK_API_BASE", DEFAULT_SLACK_API_BASE));
    let response = outbound::send(
        "Slack",
        outbound::client()
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text })),
    )
    .await?;

    // Slack reports API errors with a 200 and `ok: false`.
    let ok = response
        .body
        .get("ok")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if !ok {
        let detail = error_detail(Some(&response.body), "")
            .unwrap_or_else(|| "Unknown Slack API error".to_string());
        return Err(NodeError::integration("Slack", detail));
    }

    let mut output = json!({
        "sent": true,
        "service": "Slack",
        "via": "bot",
        "status": response.status,
    });
    if let Some(ts) = response.body.get("ts").and_then(|v| v.as_str()) {
        output["messageTs"] = Value::String(ts.to_string());
    }
    if let Some(channel_id) = response.body.get("channel").and_then(|v| v.as_str()) {
        output["channelId"] = Value::String(channel_id.to_string());
    }
    Ok(output)
}

pub(crate) async fn post_discord(
    ctx: &ExecutionContext,
    text: &str,
    username: Option<&str>,
) -> Result<Value, NodeError> {
    let webhook = ctx
        .credential(keys::DISCORD_WEBHOOK_URL)
        .ok_or_else(|| NodeError::NotConfigured("Discord".to_string()))?;
    let url = parse_webhook_url(&webhook, "Discord")?;

    let mut payload = json!({ "content": text });
    if let Some(username) = username.map(str::trim).filter(|u| !u.is_empty()) {
        payload["username"] = Value::String(username.to_string());
    }
    let response = outbound::send("Discord", outbound::client().post(url).json(&payload)).await?;
    Ok(json!({
        "sent": true,
        "service": "Discord",
        "status": response.status,
    }))
}

/// Teams through an incoming webhook, or through Microsoft Graph with the
/// user's delegated token when a team and channel are given.
pub(crate) async fn post_teams(
    ctx: &ExecutionContext,
    target: Option<(&str, &str)>,
    text: &str,
) -> Result<Value, NodeError> {
    if let Some(webhook) = ctx.credential(keys::TEAMS_WEBHOOK_URL) {
        let url = parse_webhook_url(&webhook, "Teams")?;
        let response =
            outbound::send("Teams", outbound::client().post(url).json(&json!({ "text": text })))
                .await?;
        return Ok(json!({
            "sent": true,
            "service": "Teams",
            "via": "webhook",
            "status": response.status,
        }));
    }

    let (token, (team_id, channel_id)) = match (ctx.credential(keys::MICROSOFT_ACCESS_TOKEN), target) {
        (Some(token), Some(target)) => (token, target),
        _ => return Err(NodeError::NotConfigured("Teams".to_string())),
    };

    let url = format!(
        "{}/teams/{}/channels/{}/messages",
        api_base("MICROSOFT_GRAPH_API_BASE", DEFAULT_MICROSOFT_GRAPH_BASE_URL),
        encode(team_id),
        encode(channel_id)
    );
    let response = outbound::send(
        "Teams",
        outbound::client()
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "body": { "contentType": "text", "content": text } })),
    )
    .await?;

    let mut output = json!({
        "sent": true,
        "service": "Teams",
        "via": "graph",
        "status": response.status,
    });
    if let Some(id) = response.body.get("id").and_then(|v| v.as_str()) {
        output["messageId"] = Value::String(id.to_string());
    }
    Ok(output)
}

fn simulated_or(result: Result<Value, NodeError>, service: &str, message: &str) -> Result<NodeOutput, NodeError> {
    match result {
        Ok(data) => Ok(NodeOutput::executed(data)),
        Err(NodeError::NotConfigured(_)) => Ok(NodeOutput::simulated(json!({
            "service": service,
            "message": message,
        }))),
        Err(err) => Err(err),
    }
}

fn require_message(message: &str) -> Result<(), ValidationError> {
    if message.trim().is_empty() {
        return Err(ValidationError::required("message", "Message"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessageConfig {
    pub channel: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Default)]
pub struct SlackMessageNode {
    config: NodeConfig<SlackMessageConfig>,
}

#[async_trait]
impl WorkflowNode for SlackMessageNode {
    fn node_type(&self) -> &str {
        "slack-message"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_message(&self.config.get()?.message)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let message = render(&config.message, &template_ctx);
        let channel = config.channel.as_deref().map(|c| render(c, &template_ctx));
        let result = post_slack(ctx, channel.as_deref(), &message).await;
        simulated_or(result, "Slack", &message)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordMessageConfig {
    #[serde(default)]
    pub message: String,
    pub username: Option<String>,
}

#[derive(Default)]
pub struct DiscordMessageNode {
    config: NodeConfig<DiscordMessageConfig>,
}

#[async_trait]
impl WorkflowNode for DiscordMessageNode {
    fn node_type(&self) -> &str {
        "discord-message"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_message(&self.config.get()?.message)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let message = render(&config.message, &ctx.template_context());
        let result = post_discord(ctx, &message, config.username.as_deref()).await;
        simulated_or(result, "Discord", &message)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsMessageConfig {
    #[serde(default)]
    pub message: String,
    pub team_id: Option<String>,
    pub channel_id: Option<String>,
}

impl TeamsMessageConfig {
    pub(crate) fn target(&self) -> Option<(&str, &str)> {
        let team = self.team_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let channel = self.channel_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((team, channel))
    }
}

#[derive(Default)]
pub struct TeamsMessageNode {
    config: NodeConfig<TeamsMessageConfig>,
}

#[async_trait]
impl WorkflowNode for TeamsMessageNode {
    fn node_type(&self) -> &str {
        "teams-message"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        require_message(&config.message)?;
        if config.team_id.is_some() != config.channel_id.is_some() {
            return Err(ValidationError::new(
                "channelId",
                "Team and channel must be set together",
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let message = render(&config.message, &ctx.template_context());
        let result = post_teams(ctx, config.target(), &message).await;
        simulated_or(result, "Teams", &message)
    }
}
