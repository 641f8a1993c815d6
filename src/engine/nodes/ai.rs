use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::integrations::keys;
use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::nodes::outbound::{self, api_base};
use crate::engine::templating::render;

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCompletionConfig {
    #[serde(default)]
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Default)]
pub struct AiCompletionNode {
    config: NodeConfig<AiCompletionConfig>,
}

#[async_trait]
impl WorkflowNode for AiCompletionNode {
    fn node_type(&self) -> &str {
        "ai-completion"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.prompt.trim().is_empty() {
            return Err(ValidationError::required("prompt", "Prompt"));
        }
        if let Some(t) = config.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ValidationError::new(
                    "temperature",
                    "Temperature must be between 0 and 2",
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();
        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL);

        let mut messages = Vec::new();
        if let Some(system) = config.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(json!({"role": "system", "content": render(system, &template_ctx)}));
        }
        let prompt = render(&config.prompt, &template_ctx);
        messages.push(json!({"role": "user", "content": prompt}));

        let Some(api_key) = ctx.credential(keys::OPENAI_API_KEY) else {
            return Ok(NodeOutput::simulated(json!({
                "service": "OpenAI",
                "model": model,
                "prompt": prompt,
            })));
        };

        let mut request = json!({ "model": model, "messages": messages });
        if let Some(t) = config.temperature {
            request["temperature"] = json!(t);
        }
        if let Some(max) = config.max_tokens {
            request["max_tokens"] = json!(max);
        }

        let url = format!(
            "{}/chat/completions",
            api_base("OPENAI_API_BASE", DEFAULT_OPENAI_API_BASE)
        );
        let response = outbound::send(
            "OpenAI",
            outbound::client().post(url).bearer_auth(api_key).json(&request),
        )
        .await?;

        let text = response
            .body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::integration("OpenAI", "response contained no completion"))?;

        Ok(NodeOutput::executed(json!({
            "text": text,
            "model": response.body.get("model").cloned().unwrap_or(json!(model)),
            "usage": response.body.get("usage").cloned().unwrap_or(Value::Null),
        })))
    }
}
