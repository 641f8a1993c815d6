use async_trait::async_trait;
use uuid::Uuid;

use crate::models::integration::{IntegrationConnection, IntegrationType};

/// Read-only view of the stored integration connections. Connections are
/// written by the integration management screens, never by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntegrationConnectionRepository: Send + Sync {
    async fn find_connection(
        &self,
        organization_id: Uuid,
        integration_type: IntegrationType,
    ) -> Result<Option<IntegrationConnection>, sqlx::Error>;
}
