use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::workflow_run::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted,
    ReadinessChecked,
    NodeRunning,
    NodeSucceeded,
    NodeFailed,
    RunCompleted,
    RunFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl RunEvent {
    pub fn new(kind: RunEventKind, run_id: Uuid, workflow_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            workflow_id,
            organization_id,
            node_id: None,
            node_type: None,
            status: None,
            error: None,
            duration_ms: None,
            data: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn node(mut self, node_id: &str, node_type: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self.node_type = Some(node_type.to_string());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    WorkflowRun,
    IntegrationReadiness,
}

/// User-facing message shown in the notification center.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub category: NotificationCategory,
    pub organization_id: Uuid,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl Notification {
    pub fn new(
        severity: Severity,
        category: NotificationCategory,
        title: impl Into<String>,
        message: impl Into<String>,
        run: (Uuid, Uuid, Uuid),
    ) -> Self {
        let (organization_id, workflow_id, run_id) = run;
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            category,
            organization_id,
            workflow_id,
            run_id,
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// Everything the engine publishes, tagged for SSE clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    Run(RunEvent),
    Notification(Notification),
}

impl EngineEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Run(_) => "run",
            EngineEvent::Notification(_) => "notification",
        }
    }
}

/// Fire-and-forget sink for run progress. Implementations must not block
/// and must not fail the caller.
pub trait EventSink: Send + Sync {
    fn emit_run_event(&self, event: RunEvent);

    fn emit_notification(&self, notification: Notification);
}

/// Fans events out over a tokio broadcast channel. Events sent while nobody
/// is subscribed are dropped; slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("no event subscribers, dropping event");
        }
    }
}

impl EventSink for BroadcastEventSink {
    fn emit_run_event(&self, event: RunEvent) {
        self.publish(EngineEvent::Run(event));
    }

    fn emit_notification(&self, notification: Notification) {
        self.publish(EngineEvent::Notification(notification));
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub events: std::sync::Mutex<Vec<RunEvent>>,
    pub notifications: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn kinds(&self) -> Vec<RunEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub(crate) fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit_run_event(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn emit_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}
