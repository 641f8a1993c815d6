use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Node id used for the synthetic result that carries a run-level error.
pub const WORKFLOW_NODE_ID: &str = "workflow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status `{other}`")),
        }
    }
}

/// What actually happened when a node ran, independent of `success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeOutcome {
    Executed,
    Simulated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub success: bool,
    pub outcome: NodeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl NodeResult {
    pub fn workflow_failure(message: impl Into<String>) -> Self {
        NodeResult {
            node_id: WORKFLOW_NODE_ID.to_string(),
            success: false,
            outcome: NodeOutcome::Failed,
            output: None,
            error: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn is_workflow_entry(&self) -> bool {
        self.node_id == WORKFLOW_NODE_ID
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    pub status: RunStatus,
    pub logs: Vec<NodeResult>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkflowRun {
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
}

/// Partial update of a run. `status` is always written; the other fields only
/// when present.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPatch {
    pub status: RunStatus,
    pub logs: Option<Vec<NodeResult>>,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        RunPatch {
            status,
            logs: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_logs(mut self, logs: Vec<NodeResult>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn started_at(mut self, at: OffsetDateTime) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn finished_at(mut self, at: OffsetDateTime) -> Self {
        self.finished_at = Some(at);
        self
    }
}
