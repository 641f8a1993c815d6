use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::templating::{lookup_path, parse_flexible_value, render, render_value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Builds a new object from templated field values. A value that is exactly
/// one `{{path}}` keeps the referenced value's JSON type.
#[derive(Default)]
pub struct TransformNode {
    config: NodeConfig<TransformConfig>,
}

fn single_reference(raw: &str) -> Option<&str> {
    let inner = raw.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then(|| inner.trim())
}

#[async_trait]
impl WorkflowNode for TransformNode {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if config.fields.is_empty() {
            return Err(ValidationError::required("fields", "At least one field"));
        }
        if config.fields.keys().any(|k| k.trim().is_empty()) {
            return Err(ValidationError::new("fields", "Field names cannot be blank"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        let config = self.config.get()?;
        let context = ctx.template_context();

        let mut out = Map::new();
        for (name, raw) in &config.fields {
            let value = match raw {
                Value::String(s) => match single_reference(s) {
                    Some(path) => lookup_path(&context, path).unwrap_or(Value::Null),
                    None => parse_flexible_value(&render(s, &context)),
                },
                other => render_value(other, &context),
            };
            out.insert(name.trim().to_string(), value);
        }
        Ok(NodeOutput::executed(Value::Object(out)))
    }
}
