use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::oauth_token_repository::OAuthTokenCache;
use crate::models::oauth_token::{CachedOAuthTokens, ConnectedOAuthProvider, OAuthTokens};

/// Token cache backed by the `user_oauth_tokens` table that the OAuth
/// callback flows keep fresh.
pub struct PostgresOAuthTokenCache {
    pub pool: PgPool,
}

#[derive(FromRow)]
struct TokenRow {
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<OffsetDateTime>,
}

#[async_trait]
impl OAuthTokenCache for PostgresOAuthTokenCache {
    async fn get_tokens(&self, user_id: Uuid) -> Result<CachedOAuthTokens, sqlx::Error> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT provider, access_token, refresh_token, expires_at
            FROM user_oauth_tokens
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut cached = CachedOAuthTokens::default();
        for row in rows {
            let tokens = OAuthTokens {
                access_token: row.access_token,
                refresh_token: row.refresh_token,
                expires_at: row.expires_at,
            };
            if row.provider == ConnectedOAuthProvider::Google.as_str() {
                cached.google = Some(tokens);
            } else if row.provider == ConnectedOAuthProvider::Microsoft.as_str() {
                cached.microsoft = Some(tokens);
            }
        }
        Ok(cached)
    }
}
