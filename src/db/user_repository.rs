use async_trait::async_trait;
use uuid::Uuid;

use crate::models::user::User;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_acting_id(&self, acting_id: Uuid) -> Result<Option<User>, sqlx::Error>;

    async fn find_any_user_in_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<User>, sqlx::Error>;
}
