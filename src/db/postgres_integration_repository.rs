use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::integration_repository::IntegrationConnectionRepository;
use crate::models::integration::{IntegrationConnection, IntegrationType};

pub struct PostgresIntegrationConnectionRepository {
    pub pool: PgPool,
}

#[derive(FromRow)]
struct ConnectionRow {
    id: Uuid,
    organization_id: Uuid,
    integration_type: String,
    credentials: Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[async_trait]
impl IntegrationConnectionRepository for PostgresIntegrationConnectionRepository {
    async fn find_connection(
        &self,
        organization_id: Uuid,
        integration_type: IntegrationType,
    ) -> Result<Option<IntegrationConnection>, sqlx::Error> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT id, organization_id, integration_type, credentials, created_at, updated_at
            FROM integration_connections
            WHERE organization_id = $1 AND integration_type = $2
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(integration_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let integration_type = row
                .integration_type
                .parse::<IntegrationType>()
                .map_err(|e| sqlx::Error::Decode(e.into()))?;
            Ok(IntegrationConnection {
                id: row.id,
                organization_id: row.organization_id,
                integration_type,
                credentials: row.credentials,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }
}
