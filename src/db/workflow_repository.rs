use async_trait::async_trait;
use uuid::Uuid;

use crate::models::workflow::Workflow;
use crate::models::workflow_run::{NewWorkflowRun, RunPatch, WorkflowRun};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_workflow_by_id(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error>;

    /// Inserts a brand-new run in `PENDING`.
    async fn create_workflow_run(&self, new_run: NewWorkflowRun)
        -> Result<WorkflowRun, sqlx::Error>;

    /// Applies `patch` to the run. Returns `false` when no such run exists.
    async fn update_workflow_run(&self, run_id: Uuid, patch: RunPatch)
        -> Result<bool, sqlx::Error>;

    async fn get_workflow_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error>;

    // Run history, newest first
    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error>;
}
