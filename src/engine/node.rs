use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::integrations::env_fallback_value;
use crate::models::integration::CredentialBundle;
use crate::models::workflow_run::{NodeOutcome, NodeResult};

/// A configured unit of work inside a workflow.
///
/// `configure` merges on top of whatever configuration the node already has,
/// `validate` checks that configuration without touching the network, and
/// `execute` performs the effect. `execute` may be called again on the same
/// node, it never mutates the node.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn node_type(&self) -> &str;

    fn configure(&mut self, config: &Value);

    fn validate(&self) -> Result<(), ValidationError>;

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn required(field: &str, label: &str) -> Self {
        Self::new(field, format!("{label} is required"))
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} error: {message}")]
    Integration { service: String, message: String },
    #[error("{0} is not configured")]
    NotConfigured(String),
    #[error("{0}")]
    Other(String),
}

impl NodeError {
    pub fn integration(service: impl Into<String>, message: impl Into<String>) -> Self {
        NodeError::Integration {
            service: service.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub success: bool,
    pub outcome: NodeOutcome,
    pub data: Value,
    pub error: Option<String>,
}

impl NodeOutput {
    pub fn executed(data: Value) -> Self {
        Self {
            success: true,
            outcome: NodeOutcome::Executed,
            data,
            error: None,
        }
    }

    /// Success without a side effect, used when credentials are missing.
    pub fn simulated(mut data: Value) -> Self {
        if let Value::Object(map) = &mut data {
            map.insert("simulated".to_string(), Value::Bool(true));
        }
        Self {
            success: true,
            outcome: NodeOutcome::Simulated,
            data,
            error: None,
        }
    }

    pub fn skipped(data: Value) -> Self {
        Self {
            success: true,
            outcome: NodeOutcome::Skipped,
            data,
            error: None,
        }
    }

    pub fn failed(data: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome: NodeOutcome::Failed,
            data,
            error: Some(error.into()),
        }
    }
}

/// Raw configuration map plus its typed decoding. Decoding runs every time
/// the map changes, so `validate` and `execute` only read the result.
#[derive(Debug, Clone)]
pub struct NodeConfig<C> {
    raw: Map<String, Value>,
    decoded: Result<C, ValidationError>,
}

impl<C: DeserializeOwned> NodeConfig<C> {
    pub fn new(config: &Value) -> Self {
        let raw = match config {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let decoded = decode(&raw);
        Self { raw, decoded }
    }

    /// Top-level keys in `patch` replace existing ones. Non-object patches
    /// are ignored.
    pub fn merge(&mut self, patch: &Value) {
        let Value::Object(patch) = patch else {
            return;
        };
        for (key, value) in patch {
            self.raw.insert(key.clone(), value.clone());
        }
        self.decoded = decode(&self.raw);
    }

    pub fn get(&self) -> Result<&C, ValidationError> {
        self.decoded.as_ref().map_err(Clone::clone)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

impl<C: DeserializeOwned> Default for NodeConfig<C> {
    fn default() -> Self {
        Self::new(&Value::Object(Map::new()))
    }
}

fn decode<C: DeserializeOwned>(raw: &Map<String, Value>) -> Result<C, ValidationError> {
    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| ValidationError::new("config", format!("Invalid configuration: {e}")))
}

/// Run-wide identifiers plus the results logged before the current node.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedContext {
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub organization_id: Uuid,
    pub acting_user_id: Option<Uuid>,
    pub results: Arc<[NodeResult]>,
}

/// The trigger payload plus the outputs of every node that already
/// succeeded. Each step gets its own snapshot; adding an output produces a
/// new snapshot and leaves earlier ones untouched.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    trigger: Arc<Value>,
    outputs: Arc<BTreeMap<String, Value>>,
}

impl InputSnapshot {
    pub fn new(trigger: Value) -> Self {
        Self {
            trigger: Arc::new(trigger),
            outputs: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_output(&self, node_id: &str, output: Value) -> Self {
        let mut outputs = (*self.outputs).clone();
        outputs.insert(node_id.to_string(), output);
        Self {
            trigger: Arc::clone(&self.trigger),
            outputs: Arc::new(outputs),
        }
    }

    pub fn trigger(&self) -> &Value {
        &self.trigger
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Templating context: `trigger` plus one entry per finished node. A node
    /// whose id is `trigger` shadows the raw payload with its own output.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("trigger".to_string(), (*self.trigger).clone());
        for (node_id, output) in self.outputs.iter() {
            map.insert(node_id.clone(), output.clone());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub node_id: String,
    pub input: InputSnapshot,
    pub shared: SharedContext,
    pub credentials: Option<CredentialBundle>,
}

impl ExecutionContext {
    /// Credential value from the resolved bundle, else from the environment
    /// variable backing `key`. Blank values count as absent.
    pub fn credential(&self, key: &str) -> Option<String> {
        self.credentials
            .as_ref()
            .and_then(|bundle| bundle.get(key))
            .and_then(|value| match value {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .or_else(|| env_fallback_value(key))
    }

    pub fn template_context(&self) -> Value {
        self.input.to_value()
    }
}

#[cfg(test)]
pub(crate) fn test_context(credentials: Option<CredentialBundle>) -> ExecutionContext {
    ExecutionContext {
        node_id: "node-under-test".to_string(),
        input: InputSnapshot::new(serde_json::json!({})),
        shared: SharedContext {
            workflow_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            acting_user_id: None,
            results: Arc::from(Vec::new()),
        },
        credentials,
    }
}
