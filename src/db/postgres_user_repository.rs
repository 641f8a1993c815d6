use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::user_repository::UserDirectory;
use crate::models::user::User;

pub struct PostgresUserDirectory {
    pub pool: PgPool,
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_user_by_acting_id(&self, acting_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, organization_id, email
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(acting_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_any_user_in_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, organization_id, email
            FROM users
            WHERE organization_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
    }
}
