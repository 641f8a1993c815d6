use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::workflow_repository::WorkflowRepository;
use crate::models::workflow::Workflow;
use crate::models::workflow_run::{NewWorkflowRun, NodeResult, RunPatch, RunStatus, WorkflowRun};

pub struct PostgresWorkflowRepository {
    pub pool: PgPool,
}

const RUN_COLUMNS: &str = "id, workflow_id, organization_id, status, logs, started_at, finished_at, created_at, updated_at";

#[derive(FromRow)]
struct WorkflowRunRow {
    id: Uuid,
    workflow_id: Uuid,
    organization_id: Uuid,
    status: String,
    logs: Json<Vec<NodeResult>>,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<WorkflowRunRow> for WorkflowRun {
    type Error = sqlx::Error;

    fn try_from(row: WorkflowRunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(WorkflowRun {
            id: row.id,
            workflow_id: row.workflow_id,
            organization_id: row.organization_id,
            status,
            logs: row.logs.0,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn find_workflow_by_id(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error> {
        sqlx::query_as::<_, Workflow>(
            r#"
            SELECT id, organization_id, name, nodes, edges, enabled, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_workflow_run(
        &self,
        new_run: NewWorkflowRun,
    ) -> Result<WorkflowRun, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO workflow_runs (workflow_id, organization_id, status, logs, created_at, updated_at)
            VALUES ($1, $2, $3, '[]'::jsonb, now(), now())
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, WorkflowRunRow>(&sql)
            .bind(new_run.workflow_id)
            .bind(new_run.organization_id)
            .bind(RunStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;
        WorkflowRun::try_from(row)
    }

    async fn update_workflow_run(
        &self,
        run_id: Uuid,
        patch: RunPatch,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                logs = COALESCE($3, logs),
                started_at = COALESCE($4, started_at),
                finished_at = COALESCE($5, finished_at),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(patch.status.as_str())
        .bind(patch.logs.map(Json))
        .bind(patch.started_at)
        .bind(patch.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_workflow_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1");
        let row = sqlx::query_as::<_, WorkflowRunRow>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowRun::try_from).transpose()
    }

    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE workflow_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&sql)
            .bind(workflow_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowRun::try_from).collect()
    }
}
