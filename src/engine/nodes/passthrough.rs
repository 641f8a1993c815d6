use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};

/// Stands in for node types this build does not know. Never fails and echoes
/// its configuration back as output.
pub struct PassThroughNode {
    node_type: String,
    config: NodeConfig<Map<String, Value>>,
}

impl PassThroughNode {
    pub fn new(node_type: &str) -> Self {
        Self {
            node_type: node_type.trim().to_string(),
            config: NodeConfig::default(),
        }
    }
}

#[async_trait]
impl WorkflowNode for PassThroughNode {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::skipped(Value::Object(self.config.raw().clone())))
    }
}
