use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::integration_repository::IntegrationConnectionRepository;
use crate::db::oauth_token_repository::OAuthTokenCache;
use crate::db::user_repository::UserDirectory;
use crate::db::workflow_repository::WorkflowRepository;
use crate::models::integration::{IntegrationConnection, IntegrationType};
use crate::models::oauth_token::CachedOAuthTokens;
use crate::models::user::User;
use crate::models::workflow::Workflow;
use crate::models::workflow_run::{NewWorkflowRun, RunPatch, RunStatus, WorkflowRun};

/// In-memory store implementing every repository trait. Used by the executor
/// and route tests, and handy for local experiments without Postgres.
#[derive(Default)]
pub struct MockDb {
    pub workflows: Mutex<HashMap<Uuid, Workflow>>,
    pub runs: Mutex<HashMap<Uuid, WorkflowRun>>,
    /// Every patch applied, in order.
    pub run_updates: Mutex<Vec<(Uuid, RunPatch)>>,
    pub connections: Mutex<Vec<IntegrationConnection>>,
    pub tokens: Mutex<HashMap<Uuid, CachedOAuthTokens>>,
    pub users: Mutex<Vec<User>>,
    pub should_fail: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

impl MockDb {
    pub fn insert_workflow(&self, organization_id: Uuid, nodes: Value) -> Workflow {
        let now = OffsetDateTime::now_utc();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            organization_id,
            name: "Test workflow".to_string(),
            nodes,
            edges: Value::Array(vec![]),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        lock(&self.workflows).insert(workflow.id, workflow.clone());
        workflow
    }

    pub fn add_connection(
        &self,
        organization_id: Uuid,
        integration_type: IntegrationType,
        credentials: Value,
    ) {
        let now = OffsetDateTime::now_utc();
        lock(&self.connections).push(IntegrationConnection {
            id: Uuid::new_v4(),
            organization_id,
            integration_type,
            credentials,
            created_at: now,
            updated_at: now,
        });
    }

    pub fn add_user(&self, organization_id: Uuid) -> User {
        let user = User {
            id: Uuid::new_v4(),
            organization_id,
            email: format!("user-{}@example.com", lock(&self.users).len() + 1),
        };
        lock(&self.users).push(user.clone());
        user
    }

    pub fn set_tokens(&self, user_id: Uuid, tokens: CachedOAuthTokens) {
        lock(&self.tokens).insert(user_id, tokens);
    }

    pub fn run(&self, run_id: Uuid) -> Option<WorkflowRun> {
        lock(&self.runs).get(&run_id).cloned()
    }

    pub fn run_count(&self) -> usize {
        lock(&self.runs).len()
    }

    pub fn updates_for(&self, run_id: Uuid) -> Vec<RunPatch> {
        lock(&self.run_updates)
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }
}

#[async_trait]
impl WorkflowRepository for MockDb {
    async fn find_workflow_by_id(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(lock(&self.workflows).get(&workflow_id).cloned())
    }

    async fn create_workflow_run(
        &self,
        new_run: NewWorkflowRun,
    ) -> Result<WorkflowRun, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
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
        lock(&self.runs).insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_workflow_run(
        &self,
        run_id: Uuid,
        patch: RunPatch,
    ) -> Result<bool, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        let mut runs = lock(&self.runs);
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(false);
        };
        run.status = patch.status;
        if let Some(logs) = patch.logs.clone() {
            run.logs = logs;
        }
        if let Some(at) = patch.started_at {
            run.started_at = Some(at);
        }
        if let Some(at) = patch.finished_at {
            run.finished_at = Some(at);
        }
        run.updated_at = OffsetDateTime::now_utc();
        lock(&self.run_updates).push((run_id, patch));
        Ok(true)
    }

    async fn get_workflow_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(self.run(run_id))
    }

    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        let mut runs: Vec<WorkflowRun> = lock(&self.runs)
            .values()
            .filter(|run| run.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }
}

#[async_trait]
impl IntegrationConnectionRepository for MockDb {
    async fn find_connection(
        &self,
        organization_id: Uuid,
        integration_type: IntegrationType,
    ) -> Result<Option<IntegrationConnection>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(lock(&self.connections)
            .iter()
            .rev()
            .find(|c| c.organization_id == organization_id && c.integration_type == integration_type)
            .cloned())
    }
}

#[async_trait]
impl OAuthTokenCache for MockDb {
    async fn get_tokens(&self, user_id: Uuid) -> Result<CachedOAuthTokens, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(lock(&self.tokens).get(&user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for MockDb {
    async fn find_user_by_acting_id(&self, acting_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(lock(&self.users).iter().find(|u| u.id == acting_id).cloned())
    }

    async fn find_any_user_in_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<User>, sqlx::Error> {
        if self.should_fail {
            return Err(mock_failure());
        }
        Ok(lock(&self.users)
            .iter()
            .find(|u| u.organization_id == organization_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn run_history_is_newest_first_and_capped() {
        let db = MockDb::default();
        let workflow = db.insert_workflow(Uuid::new_v4(), json!([]));
        for _ in 0..3 {
            db.create_workflow_run(NewWorkflowRun {
                workflow_id: workflow.id,
                organization_id: workflow.organization_id,
            })
            .await
            .expect("run");
        }

        let runs = db.list_runs_for_workflow(workflow.id, 2).await.expect("runs");
        assert_eq!(runs.len(), 2);
        assert!(runs[0].created_at >= runs[1].created_at);
    }

    #[tokio::test]
    async fn negative_limit_returns_no_runs() {
        let db = MockDb::default();
        let workflow = db.insert_workflow(Uuid::new_v4(), json!([]));
        db.create_workflow_run(NewWorkflowRun {
            workflow_id: workflow.id,
            organization_id: workflow.organization_id,
        })
        .await
        .expect("run");

        let runs = db.list_runs_for_workflow(workflow.id, -1).await.expect("runs");
        assert!(runs.is_empty());
    }
}
