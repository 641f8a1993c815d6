use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectedOAuthProvider {
    Google,
    Microsoft,
}

impl ConnectedOAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectedOAuthProvider::Google => "google",
            ConnectedOAuthProvider::Microsoft => "microsoft",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl OAuthTokens {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Snapshot of the token cache for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedOAuthTokens {
    pub google: Option<OAuthTokens>,
    pub microsoft: Option<OAuthTokens>,
}

impl CachedOAuthTokens {
    pub fn for_provider(&self, provider: ConnectedOAuthProvider) -> Option<&OAuthTokens> {
        match provider {
            ConnectedOAuthProvider::Google => self.google.as_ref(),
            ConnectedOAuthProvider::Microsoft => self.microsoft.as_ref(),
        }
    }
}
