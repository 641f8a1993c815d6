use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::db::integration_repository::IntegrationConnectionRepository;
use crate::db::oauth_token_repository::OAuthTokenCache;
use crate::db::user_repository::UserDirectory;
use crate::engine::integrations::{keys, required_integrations};
use crate::models::integration::CredentialBundle;
use crate::models::oauth_token::{CachedOAuthTokens, ConnectedOAuthProvider, OAuthTokens};

/// Builds the credential bundle a node needs from stored integration
/// connections and cached OAuth tokens. Lookup failures are logged and
/// treated as missing data; resolution itself never fails.
#[derive(Clone)]
pub struct CredentialResolver {
    connections: Arc<dyn IntegrationConnectionRepository>,
    tokens: Arc<dyn OAuthTokenCache>,
    users: Arc<dyn UserDirectory>,
}

fn overlay_keys(provider: ConnectedOAuthProvider) -> (&'static str, &'static str) {
    match provider {
        ConnectedOAuthProvider::Google => (keys::GOOGLE_ACCESS_TOKEN, keys::GOOGLE_REFRESH_TOKEN),
        ConnectedOAuthProvider::Microsoft => {
            (keys::MICROSOFT_ACCESS_TOKEN, keys::MICROSOFT_REFRESH_TOKEN)
        }
    }
}

fn overlay(bundle: &mut CredentialBundle, provider: ConnectedOAuthProvider, tokens: &OAuthTokens) {
    let (access_key, refresh_key) = overlay_keys(provider);
    bundle.insert(
        access_key.to_string(),
        Value::String(tokens.access_token.clone()),
    );
    if let Some(refresh) = &tokens.refresh_token {
        bundle.insert(refresh_key.to_string(), Value::String(refresh.clone()));
    }
}

impl CredentialResolver {
    pub fn new(
        connections: Arc<dyn IntegrationConnectionRepository>,
        tokens: Arc<dyn OAuthTokenCache>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            connections,
            tokens,
            users,
        }
    }

    /// Merged credentials for every integration `node_type` requires, later
    /// integrations overwriting earlier keys. `None` when nothing was found.
    pub async fn resolve(
        &self,
        organization_id: Uuid,
        node_type: &str,
        acting_user_id: Option<Uuid>,
    ) -> Option<CredentialBundle> {
        let integrations = required_integrations(node_type);
        if integrations.is_empty() {
            return None;
        }

        let mut bundle = CredentialBundle::new();
        // Looked up at most once, and only when an OAuth integration asks.
        let mut cached_tokens: Option<Option<CachedOAuthTokens>> = None;

        for integration in integrations {
            match self
                .connections
                .find_connection(organization_id, *integration)
                .await
            {
                Ok(Some(connection)) => bundle.extend(connection.credential_bundle()),
                Ok(None) => {}
                Err(err) => warn!(
                    %organization_id,
                    integration = %integration,
                    error = %err,
                    "integration connection lookup failed"
                ),
            }

            let Some(provider) = integration.oauth_family() else {
                continue;
            };
            if cached_tokens.is_none() {
                cached_tokens = Some(self.load_tokens(organization_id, acting_user_id).await);
            }
            let now = OffsetDateTime::now_utc();
            if let Some(tokens) = cached_tokens
                .as_ref()
                .and_then(|c| c.as_ref())
                .and_then(|c| c.for_provider(provider))
                .filter(|t| !t.is_expired_at(now))
            {
                overlay(&mut bundle, provider, tokens);
            }
        }

        (!bundle.is_empty()).then_some(bundle)
    }

    async fn load_tokens(
        &self,
        organization_id: Uuid,
        acting_user_id: Option<Uuid>,
    ) -> Option<CachedOAuthTokens> {
        let user_id = self.token_user(organization_id, acting_user_id).await?;
        match self.tokens.get_tokens(user_id).await {
            Ok(tokens) => Some(tokens),
            Err(err) => {
                warn!(%organization_id, %user_id, error = %err, "oauth token lookup failed");
                None
            }
        }
    }

    /// The acting user when known and part of the organization, otherwise
    /// any user of the organization.
    async fn token_user(&self, organization_id: Uuid, acting_user_id: Option<Uuid>) -> Option<Uuid> {
        if let Some(acting_id) = acting_user_id {
            match self.users.find_user_by_acting_id(acting_id).await {
                Ok(Some(user)) if user.organization_id == organization_id => return Some(user.id),
                Ok(_) => {}
                Err(err) => warn!(%acting_id, error = %err, "acting user lookup failed"),
            }
        }
        match self.users.find_any_user_in_organization(organization_id).await {
            Ok(user) => user.map(|u| u.id),
            Err(err) => {
                warn!(%organization_id, error = %err, "organization user lookup failed");
                None
            }
        }
    }
}
