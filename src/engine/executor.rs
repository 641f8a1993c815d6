use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::workflow_repository::WorkflowRepository;
use crate::engine::credentials::CredentialResolver;
use crate::engine::node::{
    ExecutionContext, InputSnapshot, NodeError, NodeOutput, SharedContext, ValidationError,
};
use crate::engine::readiness::ReadinessChecker;
use crate::engine::registry::NodeRegistry;
use crate::models::workflow::{parse_nodes, MalformedWorkflowError, NodeDescriptor, Workflow};
use crate::models::workflow_run::{
    NewWorkflowRun, NodeOutcome, NodeResult, RunPatch, RunStatus, WorkflowRun,
};
use crate::services::events::{
    EventSink, Notification, NotificationCategory, RunEvent, RunEventKind, Severity,
};

/// Errors surfaced to whoever triggers a run. Everything that goes wrong once
/// the run record exists is captured in the run itself instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("workflow {workflow_id} not found")]
    NotFound { workflow_id: Uuid },
    #[error("executor persistence operation `{operation}` failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Why a run was aborted. The display text ends up in the synthetic
/// `workflow` log entry and in the failure notification.
#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Malformed(#[from] MalformedWorkflowError),
    #[error("{source}")]
    Validation {
        node_id: String,
        source: ValidationError,
    },
    #[error("{message}")]
    Execution { node_id: String, message: String },
    #[error("failed to persist run ({operation}): {source}")]
    Persistence {
        operation: &'static str,
        source: sqlx::Error,
    },
    #[error("run record no longer exists")]
    RunNotFound,
}

impl RunError {
    fn node_id(&self) -> Option<&str> {
        match self {
            RunError::Validation { node_id, .. } | RunError::Execution { node_id, .. } => {
                Some(node_id)
            }
            _ => None,
        }
    }
}

/// Everything a single run needs to know about itself.
struct RunScope {
    workflow: Workflow,
    run_id: Uuid,
    acting_user_id: Option<Uuid>,
}

impl RunScope {
    fn event(&self, kind: RunEventKind) -> RunEvent {
        RunEvent::new(
            kind,
            self.run_id,
            self.workflow.id,
            self.workflow.organization_id,
        )
    }

    fn notification(
        &self,
        severity: Severity,
        category: NotificationCategory,
        title: &str,
        message: String,
    ) -> Notification {
        Notification::new(
            severity,
            category,
            title,
            message,
            (self.workflow.organization_id, self.workflow.id, self.run_id),
        )
    }
}

/// Runs workflows node by node in stored order, persisting the log after
/// every node so a run can be inspected while it is still going.
#[derive(Clone)]
pub struct Executor {
    workflows: Arc<dyn WorkflowRepository>,
    registry: Arc<NodeRegistry>,
    credentials: CredentialResolver,
    readiness: ReadinessChecker,
    events: Arc<dyn EventSink>,
    node_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        registry: Arc<NodeRegistry>,
        credentials: CredentialResolver,
        readiness: ReadinessChecker,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            workflows,
            registry,
            credentials,
            readiness,
            events,
            node_timeout: None,
        }
    }

    /// Caps each node's `execute` call. Off unless set.
    pub fn with_node_timeout(mut self, node_timeout: Option<Duration>) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    /// Runs the workflow to completion and returns the run id. The outcome of
    /// the run is only visible on the run record.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        payload: Option<Value>,
        acting_user_id: Option<Uuid>,
    ) -> Result<Uuid, ExecutorError> {
        let (workflow, run) = self.open_run(workflow_id).await?;
        let run_id = run.id;
        self.drive(workflow, run, payload, acting_user_id).await;
        Ok(run_id)
    }

    /// Creates the run and hands the rest to a background task.
    pub async fn start(
        &self,
        workflow_id: Uuid,
        payload: Option<Value>,
        acting_user_id: Option<Uuid>,
    ) -> Result<Uuid, ExecutorError> {
        let (workflow, run) = self.open_run(workflow_id).await?;
        let run_id = run.id;
        let executor = self.clone();
        tokio::spawn(async move {
            executor.drive(workflow, run, payload, acting_user_id).await;
        });
        Ok(run_id)
    }

    async fn open_run(&self, workflow_id: Uuid) -> Result<(Workflow, WorkflowRun), ExecutorError> {
        let workflow = self
            .workflows
            .find_workflow_by_id(workflow_id)
            .await
            .map_err(|source| ExecutorError::Persistence {
                operation: "find_workflow_by_id",
                source,
            })?
            .ok_or(ExecutorError::NotFound { workflow_id })?;

        let run = self
            .workflows
            .create_workflow_run(NewWorkflowRun {
                workflow_id: workflow.id,
                organization_id: workflow.organization_id,
            })
            .await
            .map_err(|source| ExecutorError::Persistence {
                operation: "create_workflow_run",
                source,
            })?;

        debug!(run_id = %run.id, %workflow_id, "workflow run created");
        Ok((workflow, run))
    }

    async fn drive(
        &self,
        workflow: Workflow,
        run: WorkflowRun,
        payload: Option<Value>,
        acting_user_id: Option<Uuid>,
    ) {
        let scope = RunScope {
            workflow,
            run_id: run.id,
            acting_user_id,
        };
        let mut logs: Vec<NodeResult> = Vec::new();

        match self.run_nodes(&scope, payload, &mut logs).await {
            Ok(()) => self.complete_run(&scope, logs).await,
            Err(err) => self.fail_run(&scope, logs, err).await,
        }
    }

    async fn persist(
        &self,
        run_id: Uuid,
        operation: &'static str,
        patch: RunPatch,
    ) -> Result<(), RunError> {
        match self.workflows.update_workflow_run(run_id, patch).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RunError::RunNotFound),
            Err(source) => Err(RunError::Persistence { operation, source }),
        }
    }

    async fn run_nodes(
        &self,
        scope: &RunScope,
        payload: Option<Value>,
        logs: &mut Vec<NodeResult>,
    ) -> Result<(), RunError> {
        let workflow = &scope.workflow;
        self.persist(
            scope.run_id,
            "mark_running",
            RunPatch::status(RunStatus::Running).started_at(OffsetDateTime::now_utc()),
        )
        .await?;

        info!(
            run_id = %scope.run_id,
            workflow_id = %workflow.id,
            organization_id = %workflow.organization_id,
            "workflow run started"
        );
        self.events.emit_run_event(
            scope
                .event(RunEventKind::RunStarted)
                .status(RunStatus::Running),
        );

        let nodes = parse_nodes(&workflow.nodes)?;
        self.check_readiness(scope, &nodes).await;

        let shared = SharedContext {
            workflow_id: workflow.id,
            run_id: scope.run_id,
            organization_id: workflow.organization_id,
            acting_user_id: scope.acting_user_id,
            results: Arc::from(Vec::new()),
        };
        let trigger = payload.filter(|p| !p.is_null()).unwrap_or_else(|| json!({}));
        let mut input = InputSnapshot::new(trigger);

        for descriptor in &nodes {
            let node_type = descriptor.effective_type();
            let node = self.registry.create(node_type, &descriptor.data.config);

            node.validate().map_err(|source| {
                warn!(
                    run_id = %scope.run_id,
                    node_id = %descriptor.id,
                    node_type,
                    error = %source,
                    "node configuration invalid"
                );
                RunError::Validation {
                    node_id: descriptor.id.clone(),
                    source,
                }
            })?;

            let credentials = self
                .credentials
                .resolve(workflow.organization_id, node_type, scope.acting_user_id)
                .await;
            let ctx = ExecutionContext {
                node_id: descriptor.id.clone(),
                input: input.clone(),
                shared: SharedContext {
                    results: Arc::from(logs.as_slice()),
                    ..shared.clone()
                },
                credentials,
            };

            self.events
                .emit_run_event(scope.event(RunEventKind::NodeRunning).node(&descriptor.id, node_type));
            debug!(run_id = %scope.run_id, node_id = %descriptor.id, node_type, "executing node");

            let started = Instant::now();
            let outcome = match self.node_timeout {
                Some(limit) => match timeout(limit, node.execute(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Other(format!(
                        "Node timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => node.execute(&ctx).await,
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(output) if output.success => {
                    self.events.emit_run_event(
                        scope
                            .event(RunEventKind::NodeSucceeded)
                            .node(&descriptor.id, node_type)
                            .duration_ms(duration_ms)
                            .data(output.data.clone()),
                    );
                    input = input.with_output(&descriptor.id, output.data.clone());
                    logs.push(NodeResult {
                        node_id: descriptor.id.clone(),
                        success: true,
                        outcome: output.outcome,
                        output: Some(output.data),
                        error: output.error,
                        duration_ms,
                    });
                    self.persist(
                        scope.run_id,
                        "append_node_result",
                        RunPatch::status(RunStatus::Running).with_logs(logs.clone()),
                    )
                    .await?;
                }
                failure => {
                    let (output, message) = failure_parts(failure);
                    warn!(
                        run_id = %scope.run_id,
                        node_id = %descriptor.id,
                        node_type,
                        error = %message,
                        duration_ms,
                        "node failed"
                    );
                    self.events.emit_run_event(
                        scope
                            .event(RunEventKind::NodeFailed)
                            .node(&descriptor.id, node_type)
                            .duration_ms(duration_ms)
                            .error(message.clone()),
                    );
                    logs.push(NodeResult {
                        node_id: descriptor.id.clone(),
                        success: false,
                        outcome: NodeOutcome::Failed,
                        output,
                        error: Some(message.clone()),
                        duration_ms,
                    });
                    self.persist(
                        scope.run_id,
                        "append_node_result",
                        RunPatch::status(RunStatus::Running).with_logs(logs.clone()),
                    )
                    .await?;
                    return Err(RunError::Execution {
                        node_id: descriptor.id.clone(),
                        message,
                    });
                }
            }
        }

        Ok(())
    }

    async fn check_readiness(&self, scope: &RunScope, nodes: &[NodeDescriptor]) {
        let report = self
            .readiness
            .check(scope.workflow.organization_id, nodes)
            .await;

        self.events.emit_run_event(
            scope
                .event(RunEventKind::ReadinessChecked)
                .data(serde_json::to_value(&report).unwrap_or_default()),
        );

        if report.all_configured {
            return;
        }

        let missing = report
            .missing
            .iter()
            .map(|integration| integration.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            run_id = %scope.run_id,
            workflow_id = %scope.workflow.id,
            %missing,
            "workflow uses integrations without credentials"
        );
        self.events.emit_notification(scope.notification(
            Severity::Warning,
            NotificationCategory::IntegrationReadiness,
            "Integrations not configured",
            format!(
                "Workflow '{}' uses integrations without credentials: {missing}",
                scope.workflow.name
            ),
        ));
    }

    async fn complete_run(&self, scope: &RunScope, logs: Vec<NodeResult>) {
        let patch = RunPatch::status(RunStatus::Success)
            .finished_at(OffsetDateTime::now_utc())
            .with_logs(logs);
        if let Err(err) = self.persist(scope.run_id, "mark_succeeded", patch.clone()).await {
            // Finishing the run failed after every node went through; the run
            // still has to end up terminal.
            let logs = patch.logs.unwrap_or_default();
            self.fail_run(scope, logs, err).await;
            return;
        }

        info!(
            run_id = %scope.run_id,
            workflow_id = %scope.workflow.id,
            "workflow run completed"
        );
        self.events.emit_run_event(
            scope
                .event(RunEventKind::RunCompleted)
                .status(RunStatus::Success),
        );
        self.events.emit_notification(scope.notification(
            Severity::Success,
            NotificationCategory::WorkflowRun,
            "Workflow completed",
            format!("Workflow '{}' completed successfully", scope.workflow.name),
        ));
    }

    /// Marks the run FAILED. Never propagates: a run that cannot be updated
    /// here is logged and left as is.
    async fn fail_run(&self, scope: &RunScope, mut logs: Vec<NodeResult>, err: RunError) {
        let message = err.to_string();
        logs.push(NodeResult::workflow_failure(message.clone()));

        warn!(
            run_id = %scope.run_id,
            workflow_id = %scope.workflow.id,
            node_id = err.node_id().unwrap_or("-"),
            error = %message,
            "workflow run failed"
        );

        let patch = RunPatch::status(RunStatus::Failed)
            .finished_at(OffsetDateTime::now_utc())
            .with_logs(logs);
        match self.workflows.update_workflow_run(scope.run_id, patch).await {
            Ok(true) => {}
            Ok(false) => error!(
                run_id = %scope.run_id,
                "run record missing while marking it failed"
            ),
            Err(source) => error!(
                run_id = %scope.run_id,
                error = %source,
                "failed to mark run as failed"
            ),
        }

        self.events.emit_run_event(
            scope
                .event(RunEventKind::RunFailed)
                .status(RunStatus::Failed)
                .error(message.clone()),
        );
        self.events.emit_notification(scope.notification(
            Severity::Error,
            NotificationCategory::WorkflowRun,
            "Workflow failed",
            format!("Workflow '{}' failed: {message}", scope.workflow.name),
        ));
    }
}

/// Output (if any) and error message of a node that did not succeed.
fn failure_parts(result: Result<NodeOutput, NodeError>) -> (Option<Value>, String) {
    match result {
        Ok(output) => {
            let message = output
                .error
                .unwrap_or_else(|| "Node reported failure".to_string());
            (Some(output.data), message)
        }
        Err(err) => (None, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::integration_repository::MockIntegrationConnectionRepository;
    use crate::db::mock_db::MockDb;
    use crate::db::workflow_repository::MockWorkflowRepository;
    use crate::engine::node::WorkflowNode;
    use crate::engine::nodes::test_support::{json_response, spawn_stub_server, EnvGuard};
    use crate::engine::readiness::EnvLookup;
    use crate::engine::registry::NodeFactory;
    use crate::models::integration::{CredentialBundle, IntegrationType};
    use crate::services::events::RecordingSink;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Call {
        node_id: String,
        credentials: Option<CredentialBundle>,
        input: Value,
        results: Vec<String>,
    }

    type Calls = Arc<Mutex<Vec<Call>>>;

    /// Behaves according to its config: `invalid`, `fail`, `reportFailure`,
    /// `sleepMs`, otherwise echoes `value`.
    struct ScriptedNode {
        config: Value,
        calls: Calls,
    }

    #[async_trait]
    impl WorkflowNode for ScriptedNode {
        fn node_type(&self) -> &str {
            "scripted"
        }

        fn configure(&mut self, config: &Value) {
            self.config = config.clone();
        }

        fn validate(&self) -> Result<(), ValidationError> {
            if self.config.get("invalid").is_some() {
                return Err(ValidationError::new("invalid", "Scripted node is invalid"));
            }
            Ok(())
        }

        async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
            self.calls.lock().unwrap().push(Call {
                node_id: ctx.node_id.clone(),
                credentials: ctx.credentials.clone(),
                input: ctx.input.to_value(),
                results: ctx
                    .shared
                    .results
                    .iter()
                    .map(|r| r.node_id.clone())
                    .collect(),
            });
            if let Some(ms) = self.config.get("sleepMs").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if let Some(message) = self.config.get("fail").and_then(Value::as_str) {
                return Err(NodeError::Other(message.to_string()));
            }
            if self.config.get("reportFailure").is_some() {
                return Ok(NodeOutput::failed(json!({"partial": true}), "nothing delivered"));
            }
            Ok(NodeOutput::executed(
                self.config.get("value").cloned().unwrap_or(Value::Null),
            ))
        }
    }

    struct Harness {
        db: Arc<MockDb>,
        sink: Arc<RecordingSink>,
        calls: Calls,
        executor: Executor,
    }

    fn no_env() -> EnvLookup {
        Arc::new(|_: &str| None)
    }

    fn registry(calls: &Calls) -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::builtin();
        let calls = calls.clone();
        let factory: NodeFactory = Arc::new(move || {
            Box::new(ScriptedNode {
                config: Value::Null,
                calls: calls.clone(),
            }) as Box<dyn WorkflowNode>
        });
        registry.register("step", factory.clone());
        registry.register("slack-message", factory);
        Arc::new(registry)
    }

    fn harness_with(db: Arc<MockDb>, workflows: Arc<dyn WorkflowRepository>) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let calls: Calls = Arc::default();
        let executor = Executor::new(
            workflows,
            registry(&calls),
            CredentialResolver::new(db.clone(), db.clone(), db.clone()),
            ReadinessChecker::new(db.clone(), no_env()),
            sink.clone(),
        );
        Harness {
            db,
            sink,
            calls,
            executor,
        }
    }

    fn harness() -> Harness {
        let db = Arc::new(MockDb::default());
        harness_with(db.clone(), db)
    }

    fn step(id: &str, config: Value) -> Value {
        json!({"id": id, "type": "step", "data": {"label": id, "config": config}})
    }

    fn run_of(h: &Harness, run_id: Uuid) -> WorkflowRun {
        h.db.run(run_id).expect("run should exist")
    }

    fn log_ids(run: &WorkflowRun) -> Vec<&str> {
        run.logs.iter().map(|r| r.node_id.as_str()).collect()
    }

    #[tokio::test]
    async fn missing_workflow_creates_no_run() {
        let h = harness();
        let workflow_id = Uuid::new_v4();

        let err = h
            .executor
            .execute(workflow_id, None, None)
            .await
            .expect_err("missing workflow");

        assert!(matches!(err, ExecutorError::NotFound { workflow_id: id } if id == workflow_id));
        assert_eq!(h.db.run_count(), 0);
        assert!(h.sink.kinds().is_empty());
    }

    #[tokio::test]
    async fn run_creation_failure_is_returned() {
        let db = Arc::new(MockDb::default());
        let workflow = db.insert_workflow(Uuid::new_v4(), json!([]));
        let mut repo = MockWorkflowRepository::new();
        repo.expect_find_workflow_by_id()
            .returning(move |_| Ok(Some(workflow.clone())));
        repo.expect_create_workflow_run()
            .returning(|_| Err(sqlx::Error::Protocol("insert failed".into())));
        let h = harness_with(db, Arc::new(repo));

        let err = h
            .executor
            .execute(Uuid::new_v4(), None, None)
            .await
            .expect_err("run cannot be created");
        assert!(matches!(
            err,
            ExecutorError::Persistence {
                operation: "create_workflow_run",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn successful_run_logs_every_node_in_order() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([
                {"id": "start", "type": "trigger", "data": {"config": {"inputs": [{"key": "source", "value": "manual"}]}}},
                {"id": "shape", "type": "transform", "data": {"config": {"fields": {"greeting": "hi {{trigger.name}}", "from": "{{start.source}}"}}}},
                step("last", json!({"value": {"done": true}}))
            ]),
        );

        let run_id = h
            .executor
            .execute(workflow.id, Some(json!({"name": "Ada"})), None)
            .await
            .expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.started_at.is_some());
        assert!(run.finished_at > run.started_at);
        assert_eq!(log_ids(&run), vec!["start", "shape", "last"]);
        assert!(run.logs.iter().all(|r| r.success));
        assert_eq!(
            run.logs[1].output,
            Some(json!({"greeting": "hi Ada", "from": "manual"}))
        );

        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input["shape"]["greeting"], "hi Ada");
        assert_eq!(calls[0].input["trigger"]["name"], "Ada");
        assert_eq!(calls[0].results, vec!["start", "shape"]);

        assert_eq!(
            h.sink.kinds(),
            vec![
                RunEventKind::RunStarted,
                RunEventKind::ReadinessChecked,
                RunEventKind::NodeRunning,
                RunEventKind::NodeSucceeded,
                RunEventKind::NodeRunning,
                RunEventKind::NodeSucceeded,
                RunEventKind::NodeRunning,
                RunEventKind::NodeSucceeded,
                RunEventKind::RunCompleted,
            ]
        );
        let notifications = h.sink.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].severity, Severity::Success);
    }

    #[tokio::test]
    async fn node_named_trigger_is_visible_to_later_nodes() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([
                {"id": "trigger", "type": "trigger", "data": {"config": {"inputs": [{"key": "source", "value": "manual"}]}}},
                step("last", json!({}))
            ]),
        );

        let run_id = h
            .executor
            .execute(workflow.id, Some(json!({"name": "Ada"})), None)
            .await
            .expect("run id");

        assert_eq!(run_of(&h, run_id).status, RunStatus::Success);
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls[0].input["trigger"]["source"], "manual");
        assert_eq!(calls[0].input["trigger"]["name"], "Ada");
    }

    #[tokio::test]
    async fn delay_then_http_get_records_durations() {
        let _env = EnvGuard::set("ENV", "test");
        let (addr, _requests, server) =
            spawn_stub_server(|| json_response(StatusCode::OK, json!({"ok": true}))).await;
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([
                {"id": "wait", "type": "delay", "data": {"config": {"seconds": 1}}},
                {"id": "fetch", "type": "http-get", "data": {"config": {"url": format!("http://{addr}/ping")}}}
            ]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Success, "logs: {:?}", run.logs);
        assert_eq!(log_ids(&run), vec!["wait", "fetch"]);
        assert!(run.logs[0].duration_ms >= 1000);
        assert!(run.logs.iter().all(|r| r.success));
        assert!(run.started_at.is_some());
        assert!(run.finished_at > run.started_at);
        server.abort();
    }

    #[tokio::test]
    async fn logs_are_persisted_after_each_node() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("a", json!({})), step("b", json!({}))]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let updates = h.db.updates_for(run_id);
        let statuses: Vec<RunStatus> = updates.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                RunStatus::Running,
                RunStatus::Running,
                RunStatus::Running,
                RunStatus::Success
            ]
        );
        assert!(updates[0].started_at.is_some());
        assert_eq!(updates[1].logs.as_ref().map(Vec::len), Some(1));
        assert_eq!(updates[2].logs.as_ref().map(Vec::len), Some(2));
        assert!(updates[3].finished_at.is_some());
    }

    #[tokio::test]
    async fn unknown_node_types_pass_through() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([{"id": "future", "type": "quantum-teleport", "data": {"config": {"qubits": 3}}}]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.logs[0].outcome, NodeOutcome::Skipped);
    }

    #[tokio::test]
    async fn failure_entry_is_appended_when_a_node_is_named_workflow() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("workflow", json!({})), step("b", json!({"fail": "boom"}))]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(log_ids(&run), vec!["workflow", "b", "workflow"]);
        assert!(run.logs[0].success);
        let last = run.logs.last().expect("failure entry");
        assert!(!last.success);
        assert_eq!(last.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn validation_failure_leaves_only_the_workflow_entry() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([{"id": "check", "type": "condition", "data": {"config": {"field": "", "operator": ""}}}]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(log_ids(&run), vec!["workflow"]);
        assert!(!run.logs[0].success);
        assert!(run.finished_at.is_some());
        assert!(!h.sink.kinds().contains(&RunEventKind::NodeRunning));
    }

    #[tokio::test]
    async fn validation_failure_keeps_earlier_results() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("a", json!({})), step("b", json!({"invalid": true})), step("c", json!({}))]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(log_ids(&run), vec!["a", "workflow"]);
        assert_eq!(run.logs[1].error.as_deref(), Some("Scripted node is invalid"));
        assert_eq!(h.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_failing_node_stops_the_run() {
        for failing_at in 0..3 {
            let h = harness();
            let nodes: Vec<Value> = (0..3)
                .map(|i| {
                    let config = if i == failing_at {
                        json!({"fail": "upstream exploded"})
                    } else {
                        json!({})
                    };
                    step(&format!("n{i}"), config)
                })
                .collect();
            let workflow = h.db.insert_workflow(Uuid::new_v4(), Value::Array(nodes));

            let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

            let run = run_of(&h, run_id);
            assert_eq!(run.status, RunStatus::Failed);
            assert_eq!(run.logs.len(), failing_at + 2);
            let failed = &run.logs[failing_at];
            assert!(!failed.success);
            assert_eq!(failed.error.as_deref(), Some("upstream exploded"));
            let last = run.logs.last().expect("workflow entry");
            assert!(last.is_workflow_entry());
            assert_eq!(last.error.as_deref(), Some("upstream exploded"));
            assert_eq!(h.calls.lock().unwrap().len(), failing_at + 1);

            let kinds = h.sink.kinds();
            assert!(kinds.contains(&RunEventKind::NodeFailed));
            assert_eq!(kinds.last(), Some(&RunEventKind::RunFailed));
            assert_eq!(h.sink.notifications()[0].severity, Severity::Error);
        }
    }

    #[tokio::test]
    async fn reported_failure_keeps_node_output() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("alert", json!({"reportFailure": true}))]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.logs[0].output, Some(json!({"partial": true})));
        assert_eq!(run.logs[0].error.as_deref(), Some("nothing delivered"));
        assert_eq!(run.logs[0].outcome, NodeOutcome::Failed);
    }

    #[tokio::test]
    async fn malformed_nodes_fail_before_anything_runs() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("a", json!({})), {"id": "b", "data": {}}]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(log_ids(&run), vec!["workflow"]);
        assert!(run.logs[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("Malformed workflow"));
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_integrations_only_warn() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([{"id": "notify", "type": "slack-message", "data": {}}]),
        );

        let run_id = h.executor.execute(workflow.id, None, None).await.expect("run id");

        assert_eq!(run_of(&h, run_id).status, RunStatus::Success);
        let notifications = h.sink.notifications();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].severity, Severity::Warning);
        assert_eq!(
            notifications[0].category,
            NotificationCategory::IntegrationReadiness
        );
        assert!(notifications[0].message.contains("slack"));
    }

    #[tokio::test]
    async fn nodes_receive_resolved_credentials() {
        let h = harness();
        let org = Uuid::new_v4();
        h.db.add_connection(org, IntegrationType::Slack, json!({"slack_bot_token": "xoxb-1"}));
        let user = h.db.add_user(org);
        let workflow = h.db.insert_workflow(
            org,
            json!([step("plain", json!({})), {"id": "notify", "type": "slack-message", "data": {}}]),
        );

        h.executor
            .execute(workflow.id, None, Some(user.id))
            .await
            .expect("run id");

        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls[0].node_id, "plain");
        assert!(calls[0].credentials.is_none());
        let bundle = calls[1].credentials.clone().expect("slack credentials");
        assert_eq!(bundle["slack_bot_token"], "xoxb-1");
        assert_eq!(h.sink.notifications().len(), 1);
    }

    #[tokio::test]
    async fn node_timeout_fails_the_node() {
        let h = harness();
        let executor = h
            .executor
            .clone()
            .with_node_timeout(Some(Duration::from_millis(20)));
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("slow", json!({"sleepMs": 2000}))]),
        );

        let run_id = executor.execute(workflow.id, None, None).await.expect("run id");

        let run = run_of(&h, run_id);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.logs[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn persistence_failure_mid_run_is_swallowed() {
        let db = Arc::new(MockDb::default());
        let workflow = db.insert_workflow(Uuid::new_v4(), json!([step("a", json!({}))]));
        let lookup = workflow.clone();
        let mut repo = MockWorkflowRepository::new();
        repo.expect_find_workflow_by_id()
            .returning(move |_| Ok(Some(lookup.clone())));
        let db_for_create = db.clone();
        repo.expect_create_workflow_run().returning(move |new_run| {
            insert_pending_run(&db_for_create, new_run)
        });
        repo.expect_update_workflow_run()
            .returning(|_, _| Err(sqlx::Error::Protocol("connection reset".into())));
        let h = harness_with(db, Arc::new(repo));

        let run_id = h
            .executor
            .execute(workflow.id, None, None)
            .await
            .expect("run id is still returned");

        assert_eq!(run_of(&h, run_id).status, RunStatus::Pending);
        assert!(h.calls.lock().unwrap().is_empty());
        assert_eq!(h.sink.kinds(), vec![RunEventKind::RunFailed]);
        assert_eq!(h.sink.notifications()[0].severity, Severity::Error);
    }

    /// Inserts the run straight into the in-memory store so the mocked
    /// repository can hand back a real record.
    fn insert_pending_run(db: &MockDb, new_run: NewWorkflowRun) -> Result<WorkflowRun, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: new_run.workflow_id,
            organization_id: new_run.organization_id,
            status: RunStatus::Pending,
            logs: vec![],
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        db.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(run)
    }

    #[tokio::test]
    async fn readiness_lookup_errors_do_not_block_the_run() {
        let db = Arc::new(MockDb::default());
        let mut connections = MockIntegrationConnectionRepository::new();
        connections
            .expect_find_connection()
            .returning(|_, _| Err(sqlx::Error::Protocol("down".into())));
        let sink = Arc::new(RecordingSink::default());
        let calls: Calls = Arc::default();
        let executor = Executor::new(
            db.clone(),
            registry(&calls),
            CredentialResolver::new(db.clone(), db.clone(), db.clone()),
            ReadinessChecker::new(Arc::new(connections), no_env()),
            sink.clone(),
        );
        let workflow = db.insert_workflow(
            Uuid::new_v4(),
            json!([{"id": "notify", "type": "slack-message", "data": {}}]),
        );

        let run_id = executor.execute(workflow.id, None, None).await.expect("run id");

        assert_eq!(db.run(run_id).map(|r| r.status), Some(RunStatus::Success));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_returns_before_the_run_finishes() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("slow", json!({"sleepMs": 50}))]),
        );

        let run_id = h.executor.start(workflow.id, None, None).await.expect("run id");
        assert!(!run_of(&h, run_id).status.is_terminal());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !run_of(&h, run_id).status.is_terminal() {
            assert!(Instant::now() < deadline, "run did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(run_of(&h, run_id).status, RunStatus::Success);
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_interfere() {
        let h = harness();
        let workflow = h.db.insert_workflow(
            Uuid::new_v4(),
            json!([step("a", json!({"sleepMs": 10})), step("b", json!({}))]),
        );

        let (first, second) = tokio::join!(
            h.executor.execute(workflow.id, Some(json!({"n": 1})), None),
            h.executor.execute(workflow.id, Some(json!({"n": 2})), None)
        );
        let (first, second) = (first.expect("first"), second.expect("second"));

        assert_ne!(first, second);
        for run_id in [first, second] {
            let run = run_of(&h, run_id);
            assert_eq!(run.status, RunStatus::Success);
            assert_eq!(log_ids(&run), vec!["a", "b"]);
        }
    }
}
