use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::nodes::email::{deliver_email, smtp_config, Recipients};
use crate::engine::nodes::messaging::{post_discord, post_slack, post_teams};
use crate::engine::templating::render;
use crate::services::mailer::{Mailer, SmtpMailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Slack,
    Discord,
    Email,
    Teams,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Slack => "slack",
            AlertChannel::Discord => "discord",
            AlertChannel::Email => "email",
            AlertChannel::Teams => "teams",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(AlertChannel::Slack),
            "discord" => Ok(AlertChannel::Discord),
            "email" | "smtp" => Ok(AlertChannel::Email),
            "teams" | "microsoft-teams" | "microsoft_teams" => Ok(AlertChannel::Teams),
            other => Err(format!("Unsupported alert channel {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiChannelAlertConfig {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub message: String,
    pub subject: Option<String>,
    pub slack_channel: Option<String>,
    #[serde(default)]
    pub email_to: Recipients,
    pub team_id: Option<String>,
    pub channel_id: Option<String>,
}

impl MultiChannelAlertConfig {
    fn parsed_channels(&self) -> Result<Vec<AlertChannel>, ValidationError> {
        let mut channels = Vec::new();
        for raw in &self.channels {
            let channel = raw
                .parse::<AlertChannel>()
                .map_err(|e| ValidationError::new("channels", e))?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    fn teams_target(&self) -> Option<(&str, &str)> {
        let team = self.team_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let channel = self.channel_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((team, channel))
    }
}

/// Result of one channel attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDelivery {
    pub channel: AlertChannel,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSummary {
    pub deliveries: Vec<ChannelDelivery>,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.deliveries.len()
    }

    pub fn successful(&self) -> usize {
        self.deliveries.iter().filter(|d| d.success).count()
    }

    /// One delivered channel is enough.
    pub fn success(&self) -> bool {
        self.successful() > 0
    }

    pub fn to_value(&self) -> Value {
        json!({
            "totalChannels": self.total(),
            "successfulChannels": self.successful(),
            "channels": self.deliveries,
        })
    }
}

/// Sends one alert over several channels. Each channel is attempted on its
/// own; a failing channel is recorded and the rest still run.
pub struct MultiChannelAlertNode {
    config: NodeConfig<MultiChannelAlertConfig>,
    mailer: Arc<dyn Mailer>,
}

impl Default for MultiChannelAlertNode {
    fn default() -> Self {
        Self::with_mailer(Arc::new(SmtpMailer))
    }
}

impl MultiChannelAlertNode {
    pub fn with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config: NodeConfig::default(),
            mailer,
        }
    }

    async fn deliver(
        &self,
        channel: AlertChannel,
        config: &MultiChannelAlertConfig,
        ctx: &ExecutionContext,
        message: &str,
    ) -> Result<Value, NodeError> {
        let template_ctx = ctx.template_context();
        match channel {
            AlertChannel::Slack => {
                let slack_channel = config
                    .slack_channel
                    .as_deref()
                    .map(|c| render(c, &template_ctx));
                post_slack(ctx, slack_channel.as_deref(), message).await
            }
            AlertChannel::Discord => post_discord(ctx, message, None).await,
            AlertChannel::Teams => post_teams(ctx, config.teams_target(), message).await,
            AlertChannel::Email => {
                let recipients = config.email_to.render(&template_ctx);
                if recipients.is_empty() {
                    return Err(ValidationError::required("emailTo", "Email recipient").into());
                }
                let smtp = smtp_config(ctx, None)
                    .ok_or_else(|| NodeError::NotConfigured("SMTP".to_string()))?;
                let subject = config
                    .subject
                    .as_deref()
                    .map(|s| render(s, &template_ctx))
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "Workflow alert".to_string());
                deliver_email(self.mailer.as_ref(), &smtp, &recipients, &subject, message).await
            }
        }
    }

    pub async fn dispatch(&self, ctx: &ExecutionContext) -> Result<DispatchSummary, NodeError> {
        let config = self.config.get()?;
        let channels = config.parsed_channels()?;
        let message = render(&config.message, &ctx.template_context());

        let mut deliveries = Vec::with_capacity(channels.len());
        for channel in channels {
            let delivery = match self.deliver(channel, config, ctx, &message).await {
                Ok(detail) => ChannelDelivery {
                    channel,
                    success: true,
                    error: None,
                    detail: Some(detail),
                },
                Err(err) => {
                    warn!(node_id = %ctx.node_id, %channel, error = %err, "alert channel failed");
                    ChannelDelivery {
                        channel,
                        success: false,
                        error: Some(err.to_string()),
                        detail: None,
                    }
                }
            };
            deliveries.push(delivery);
        }
        Ok(DispatchSummary { deliveries })
    }
}

#[async_trait]
impl WorkflowNode for MultiChannelAlertNode {
    fn node_type(&self) -> &str {
        "multi-channel-alert"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.message.trim().is_empty() {
            return Err(ValidationError::required("message", "Alert message"));
        }
        let channels = config.parsed_channels()?;
        if channels.is_empty() {
            return Err(ValidationError::required("channels", "At least one channel"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let summary = self.dispatch(ctx).await?;
        let data = summary.to_value();
        if summary.success() {
            Ok(NodeOutput::executed(data))
        } else {
            Ok(NodeOutput::failed(
                data,
                format!("All {} alert channels failed", summary.total()),
            ))
        }
    }
}
