use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::integrations::keys;
use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::templating::render;
use crate::services::mailer::{Mailer, SmtpConfig, SmtpMailer, TlsMode};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Recipients as entered in the editor: one string (comma or semicolon
/// separated) or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Default for Recipients {
    fn default() -> Self {
        Recipients::Many(vec![])
    }
}

impl Recipients {
    pub fn render(&self, ctx: &Value) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Recipients::One(s) => vec![s.as_str()],
            Recipients::Many(list) => list.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .flat_map(|entry| {
                render(entry, ctx)
                    .split([',', ';'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn is_blank(&self) -> bool {
        match self {
            Recipients::One(s) => s.trim().is_empty(),
            Recipients::Many(list) => list.iter().all(|s| s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub to: Recipients,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub from: Option<String>,
}

/// SMTP settings from the resolved credentials. `None` when no host is
/// known, which callers treat as "not configured".
pub(crate) fn smtp_config(ctx: &ExecutionContext, from_override: Option<&str>) -> Option<SmtpConfig> {
    let host = ctx.credential(keys::SMTP_HOST)?;
    let port = ctx
        .credential(keys::SMTP_PORT)
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_SMTP_PORT);
    let username = ctx.credential(keys::SMTP_USERNAME);
    let password = ctx.credential(keys::SMTP_PASSWORD);
    let tls_mode = ctx
        .credential(keys::SMTP_TLS)
        .and_then(|m| m.parse::<TlsMode>().ok())
        .unwrap_or_else(|| TlsMode::for_port(port));
    let from = from_override
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.credential(keys::SMTP_FROM))
        .or_else(|| username.clone())?;

    Some(SmtpConfig {
        host,
        port,
        username,
        password,
        from,
        tls_mode,
    })
}

pub(crate) async fn deliver_email(
    mailer: &dyn Mailer,
    config: &SmtpConfig,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> Result<Value, NodeError> {
    mailer
        .send_email_with_config(config, recipients, subject, body)
        .await
        .map_err(|e| NodeError::integration("SMTP", e.to_string()))?;
    Ok(json!({
        "sent": true,
        "service": "SMTP",
        "recipients": recipients,
    }))
}

pub struct SendEmailNode {
    config: NodeConfig<EmailConfig>,
    mailer: Arc<dyn Mailer>,
}

impl Default for SendEmailNode {
    fn default() -> Self {
        Self::with_mailer(Arc::new(SmtpMailer))
    }
}

impl SendEmailNode {
    pub fn with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config: NodeConfig::default(),
            mailer,
        }
    }
}

#[async_trait]
impl WorkflowNode for SendEmailNode {
    fn node_type(&self) -> &str {
        "send-email"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.to.is_blank() {
            return Err(ValidationError::required("to", "Recipient"));
        }
        if config.subject.trim().is_empty() {
            return Err(ValidationError::required("subject", "Subject"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let recipients = config.to.render(&template_ctx);
        if recipients.is_empty() {
            return Err(ValidationError::required("to", "Recipient").into());
        }
        let subject = render(&config.subject, &template_ctx);
        let body = render(&config.body, &template_ctx);

        let Some(smtp) = smtp_config(ctx, config.from.as_deref()) else {
            return Ok(NodeOutput::simulated(json!({
                "service": "SMTP",
                "recipients": recipients,
                "subject": subject,
            })));
        };

        let output = deliver_email(self.mailer.as_ref(), &smtp, &recipients, &subject, &body).await?;
        Ok(NodeOutput::executed(output))
    }
}
