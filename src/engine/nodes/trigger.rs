use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::templating::{parse_flexible_value, render};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub inputs: Vec<TriggerInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerInput {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Entry point of a workflow. Emits the trigger payload plus any static
/// inputs configured in the editor.
#[derive(Default)]
pub struct TriggerNode {
    config: NodeConfig<TriggerConfig>,
}

#[async_trait]
impl WorkflowNode for TriggerNode {
    fn node_type(&self) -> &str {
        "trigger"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.inputs.iter().any(|input| input.key.trim().is_empty()) {
            return Err(ValidationError::required("inputs", "Trigger input key"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let template_ctx = ctx.template_context();

        let mut map = match ctx.input.trigger() {
            Value::Object(payload) => payload.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };

        for input in &config.inputs {
            let value = match &input.value {
                Value::String(raw) => parse_flexible_value(&render(raw, &template_ctx)),
                other => other.clone(),
            };
            map.insert(input.key.trim().to_string(), value);
        }

        Ok(NodeOutput::executed(Value::Object(map)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::{test_context, InputSnapshot};
    use serde_json::json;

    #[tokio::test]
    async fn merges_payload_with_templated_inputs() {
        let mut node = TriggerNode::default();
        node.configure(&json!({"inputs": [
            {"key": "greeting", "value": "hi {{trigger.name}}"},
            {"key": "count", "value": "3"},
            {"key": "flag", "value": true}
        ]}));
        assert!(node.validate().is_ok());

        let mut ctx = test_context(None);
        ctx.input = InputSnapshot::new(json!({"name": "Ada"}));

        let output = node.execute(&ctx).await.expect("trigger runs");
        assert_eq!(
            output.data,
            json!({"name": "Ada", "greeting": "hi Ada", "count": 3, "flag": true})
        );
    }

    #[tokio::test]
    async fn scalar_payload_is_wrapped() {
        let node = TriggerNode::default();
        let mut ctx = test_context(None);
        ctx.input = InputSnapshot::new(json!("ping"));
        let output = node.execute(&ctx).await.expect("trigger runs");
        assert_eq!(output.data, json!({"payload": "ping"}));
    }

    #[test]
    fn blank_input_keys_fail_validation() {
        let mut node = TriggerNode::default();
        node.configure(&json!({"inputs": [{"key": " ", "value": "x"}]}));
        assert!(node.validate().is_err());
    }
}
