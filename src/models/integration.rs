use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::oauth_token::ConnectedOAuthProvider;

/// Merged credential material handed to a node. Keys are the canonical names
/// listed in `engine::integrations::keys`.
pub type CredentialBundle = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    GoogleCalendar,
    GoogleClassroom,
    MicrosoftTeams,
    Zoom,
    Slack,
    Discord,
    Smtp,
    #[serde(rename = "openai")]
    OpenAi,
}

impl IntegrationType {
    pub const ALL: [IntegrationType; 8] = [
        IntegrationType::GoogleCalendar,
        IntegrationType::GoogleClassroom,
        IntegrationType::MicrosoftTeams,
        IntegrationType::Zoom,
        IntegrationType::Slack,
        IntegrationType::Discord,
        IntegrationType::Smtp,
        IntegrationType::OpenAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::GoogleCalendar => "google_calendar",
            IntegrationType::GoogleClassroom => "google_classroom",
            IntegrationType::MicrosoftTeams => "microsoft_teams",
            IntegrationType::Zoom => "zoom",
            IntegrationType::Slack => "slack",
            IntegrationType::Discord => "discord",
            IntegrationType::Smtp => "smtp",
            IntegrationType::OpenAi => "openai",
        }
    }

    /// OAuth family whose cached user tokens are overlaid on stored credentials.
    pub fn oauth_family(&self) -> Option<ConnectedOAuthProvider> {
        match self {
            IntegrationType::GoogleCalendar | IntegrationType::GoogleClassroom => {
                Some(ConnectedOAuthProvider::Google)
            }
            IntegrationType::MicrosoftTeams => Some(ConnectedOAuthProvider::Microsoft),
            _ => None,
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        IntegrationType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown integration type `{s}`"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConnection {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub integration_type: IntegrationType,
    /// Arbitrary key/value credential material. Non-object values are ignored.
    pub credentials: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl IntegrationConnection {
    pub fn credential_bundle(&self) -> CredentialBundle {
        match &self.credentials {
            Value::Object(map) => map.clone(),
            _ => CredentialBundle::new(),
        }
    }
}
