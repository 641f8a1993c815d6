use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Stored node array exactly as the editor saved it. Structural checks
    /// happen when a run starts, see [`parse_nodes`].
    pub nodes: Value,
    /// Connectivity metadata for the editor. The executor never reads it.
    pub edges: Value,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub label: Option<String>,
    pub node_type: Option<String>,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub data: NodeData,
}

impl NodeDescriptor {
    /// `data.nodeType` wins over the outer `type` when the editor set both.
    pub fn effective_type(&self) -> &str {
        self.data
            .node_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.node_type.as_str())
    }

    pub fn label(&self) -> &str {
        self.data
            .label
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedWorkflowError {
    #[error("Malformed workflow: node list must be an array")]
    NotAnArray,
    #[error("Malformed workflow: node at index {index} {reason}")]
    InvalidNode { index: usize, reason: String },
    #[error("Malformed workflow: duplicate node id '{0}'")]
    DuplicateId(String),
}

fn invalid(index: usize, reason: &str) -> MalformedWorkflowError {
    MalformedWorkflowError::InvalidNode {
        index,
        reason: reason.to_string(),
    }
}

/// Checks the stored node array and turns it into descriptors. Every element
/// must carry a non-empty string `id`, a non-empty string `type` and an object
/// `data`.
pub fn parse_nodes(nodes: &Value) -> Result<Vec<NodeDescriptor>, MalformedWorkflowError> {
    let items = nodes
        .as_array()
        .ok_or(MalformedWorkflowError::NotAnArray)?;

    let mut seen: HashSet<&str> = HashSet::new();
    let mut parsed = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| invalid(index, "is not an object"))?;

        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid(index, "is missing a string id"))?;
        let node_type = obj
            .get("type")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid(index, "is missing a string type"))?;
        let data = obj
            .get("data")
            .and_then(|v| v.as_object())
            .ok_or_else(|| invalid(index, "is missing an object data"))?;

        if !seen.insert(id) {
            return Err(MalformedWorkflowError::DuplicateId(id.to_string()));
        }

        parsed.push(NodeDescriptor {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data: parse_data(data),
        });
    }

    Ok(parsed)
}

fn parse_data(data: &Map<String, Value>) -> NodeData {
    let label = data
        .get("label")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let node_type = data
        .get("nodeType")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let config = match data.get("config") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };
    NodeData {
        label,
        node_type,
        config,
    }
}
