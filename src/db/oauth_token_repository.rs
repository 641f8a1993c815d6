use async_trait::async_trait;
use uuid::Uuid;

use crate::models::oauth_token::CachedOAuthTokens;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthTokenCache: Send + Sync {
    async fn get_tokens(&self, user_id: Uuid) -> Result<CachedOAuthTokens, sqlx::Error>;
}
