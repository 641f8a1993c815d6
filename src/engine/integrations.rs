//! The single table describing which integrations each node kind needs, and
//! which environment variables stand in for a stored connection. Both the
//! credential resolver and the readiness checker read from here.

use crate::engine::registry::NodeKind;
use crate::models::integration::IntegrationType;

/// Canonical credential keys nodes read from a [`CredentialBundle`].
///
/// [`CredentialBundle`]: crate::models::integration::CredentialBundle
pub mod keys {
    pub const SMTP_HOST: &str = "smtp_host";
    pub const SMTP_PORT: &str = "smtp_port";
    pub const SMTP_USERNAME: &str = "smtp_username";
    pub const SMTP_PASSWORD: &str = "smtp_password";
    pub const SMTP_FROM: &str = "smtp_from";
    pub const SMTP_TLS: &str = "smtp_tls";
    pub const SLACK_BOT_TOKEN: &str = "slack_bot_token";
    pub const SLACK_WEBHOOK_URL: &str = "slack_webhook_url";
    pub const DISCORD_WEBHOOK_URL: &str = "discord_webhook_url";
    pub const TEAMS_WEBHOOK_URL: &str = "teams_webhook_url";
    pub const GOOGLE_CLIENT_ID: &str = "google_client_id";
    pub const GOOGLE_CLIENT_SECRET: &str = "google_client_secret";
    pub const GOOGLE_ACCESS_TOKEN: &str = "google_access_token";
    pub const GOOGLE_REFRESH_TOKEN: &str = "google_refresh_token";
    pub const MICROSOFT_ACCESS_TOKEN: &str = "microsoft_access_token";
    pub const MICROSOFT_REFRESH_TOKEN: &str = "microsoft_refresh_token";
    pub const ZOOM_ACCOUNT_ID: &str = "zoom_account_id";
    pub const ZOOM_CLIENT_ID: &str = "zoom_client_id";
    pub const ZOOM_CLIENT_SECRET: &str = "zoom_client_secret";
    pub const ZOOM_ACCESS_TOKEN: &str = "zoom_access_token";
    pub const OPENAI_API_KEY: &str = "openai_api_key";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvFallback {
    pub var: &'static str,
    pub key: &'static str,
}

const fn fallback(var: &'static str, key: &'static str) -> EnvFallback {
    EnvFallback { var, key }
}

const SMTP_ENV: &[EnvFallback] = &[
    fallback("SMTP_HOST", keys::SMTP_HOST),
    fallback("SMTP_USERNAME", keys::SMTP_USERNAME),
    fallback("SMTP_PASSWORD", keys::SMTP_PASSWORD),
];
const SLACK_ENV: &[EnvFallback] = &[fallback("SLACK_BOT_TOKEN", keys::SLACK_BOT_TOKEN)];
const DISCORD_ENV: &[EnvFallback] = &[fallback("DISCORD_WEBHOOK_URL", keys::DISCORD_WEBHOOK_URL)];
const TEAMS_ENV: &[EnvFallback] = &[fallback("TEAMS_WEBHOOK_URL", keys::TEAMS_WEBHOOK_URL)];
const GOOGLE_ENV: &[EnvFallback] = &[
    fallback("GOOGLE_CLIENT_ID", keys::GOOGLE_CLIENT_ID),
    fallback("GOOGLE_CLIENT_SECRET", keys::GOOGLE_CLIENT_SECRET),
];
const ZOOM_ENV: &[EnvFallback] = &[
    fallback("ZOOM_ACCOUNT_ID", keys::ZOOM_ACCOUNT_ID),
    fallback("ZOOM_CLIENT_ID", keys::ZOOM_CLIENT_ID),
    fallback("ZOOM_CLIENT_SECRET", keys::ZOOM_CLIENT_SECRET),
];
const OPENAI_ENV: &[EnvFallback] = &[fallback("OPENAI_API_KEY", keys::OPENAI_API_KEY)];

/// Optional settings that may come from the environment but never decide
/// whether an integration counts as configured.
const OPTIONAL_ENV: &[EnvFallback] = &[
    fallback("SMTP_PORT", keys::SMTP_PORT),
    fallback("SMTP_FROM", keys::SMTP_FROM),
    fallback("SMTP_TLS", keys::SMTP_TLS),
    fallback("SLACK_WEBHOOK_URL", keys::SLACK_WEBHOOK_URL),
];

/// Environment variables that together stand in for a stored connection.
pub fn env_fallbacks(integration: IntegrationType) -> &'static [EnvFallback] {
    match integration {
        IntegrationType::Smtp => SMTP_ENV,
        IntegrationType::Slack => SLACK_ENV,
        IntegrationType::Discord => DISCORD_ENV,
        IntegrationType::MicrosoftTeams => TEAMS_ENV,
        IntegrationType::GoogleCalendar | IntegrationType::GoogleClassroom => GOOGLE_ENV,
        IntegrationType::Zoom => ZOOM_ENV,
        IntegrationType::OpenAi => OPENAI_ENV,
    }
}

pub fn integrations_for(kind: NodeKind) -> &'static [IntegrationType] {
    match kind {
        NodeKind::Trigger
        | NodeKind::Delay
        | NodeKind::HttpRequest
        | NodeKind::Condition
        | NodeKind::Transform => &[],
        NodeKind::SendEmail => &[IntegrationType::Smtp],
        NodeKind::SlackMessage => &[IntegrationType::Slack],
        NodeKind::DiscordMessage => &[IntegrationType::Discord],
        NodeKind::TeamsMessage => &[IntegrationType::MicrosoftTeams],
        NodeKind::CalendarEvent => &[IntegrationType::GoogleCalendar],
        NodeKind::ClassroomAnnouncement => &[IntegrationType::GoogleClassroom],
        NodeKind::ZoomMeeting => &[IntegrationType::Zoom],
        NodeKind::AiCompletion => &[IntegrationType::OpenAi],
        NodeKind::MultiChannelAlert => &[
            IntegrationType::Slack,
            IntegrationType::Discord,
            IntegrationType::Smtp,
            IntegrationType::MicrosoftTeams,
        ],
    }
}

/// Integrations a node type string needs. Unknown types need nothing.
pub fn required_integrations(node_type: &str) -> &'static [IntegrationType] {
    NodeKind::from_type(node_type)
        .map(integrations_for)
        .unwrap_or(&[])
}

/// Environment variable that backs a credential key, if any.
pub fn env_var_for_key(key: &str) -> Option<&'static str> {
    IntegrationType::ALL
        .iter()
        .flat_map(|t| env_fallbacks(*t).iter())
        .chain(OPTIONAL_ENV.iter())
        .find(|f| f.key == key)
        .map(|f| f.var)
}

pub fn env_fallback_value(key: &str) -> Option<String> {
    let var = env_var_for_key(key)?;
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
