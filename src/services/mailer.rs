use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::Mailbox,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid Address: {0}")]
    InvalidEmailAddress(String),
    #[error("Send error: {0}")]
    SendError(String),
    #[error("Error: {0}")]
    Other(String),
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailError::SendError(err.to_string())
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        MailError::SendError(err.to_string())
    }
}

impl From<AddressError> for MailError {
    fn from(e: AddressError) -> Self {
        MailError::InvalidEmailAddress(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    StartTls,
    Implicit,
    None,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::StartTls => "starttls",
            TlsMode::Implicit => "implicit_tls",
            TlsMode::None => "none",
        }
    }

    /// 465 is the implicit TLS port; everything else negotiates STARTTLS.
    pub fn for_port(port: u16) -> Self {
        if port == 465 {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" | "start_tls" => Ok(TlsMode::StartTls),
            "implicit" | "implicit_tls" | "tls" | "ssl" => Ok(TlsMode::Implicit),
            "none" | "off" | "disabled" | "plain" => Ok(TlsMode::None),
            other => Err(format!("unknown TLS mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls_mode: TlsMode,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email_with_config(
        &self,
        config: &SmtpConfig,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

/// Opens a fresh SMTP transport per message from the supplied settings.
#[derive(Debug, Clone, Default)]
pub struct SmtpMailer;

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_email_with_config(
        &self,
        config: &SmtpConfig,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        if recipients.is_empty() {
            return Err(MailError::Other("no recipients".to_string()));
        }
        let from_mailbox: Mailbox = config.from.parse()?;
        let mut builder = Message::builder().from(from_mailbox);

        for recipient in recipients {
            let mailbox: Mailbox = recipient.parse()?;
            builder = builder.to(mailbox);
        }

        let email = builder.subject(subject).body(body.to_string())?;
        let transport = build_dynamic_transport(config)?;

        transport.send(email).await.map(|_| ()).map_err(|e| {
            MailError::SendError(format!(
                "{} (host: {}:{}, tls: {}, auth: {})",
                e,
                config.host,
                config.port,
                config.tls_mode,
                if config.username.is_some() {
                    "set"
                } else {
                    "not set"
                }
            ))
        })
    }
}

fn build_dynamic_transport(
    config: &SmtpConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
    let mut builder = match config.tls_mode {
        TlsMode::StartTls => {
            let tls = TlsParameters::new(config.host.clone())?;
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                .port(config.port)
                .tls(Tls::Required(tls))
        }
        TlsMode::Implicit => {
            let tls = TlsParameters::new(config.host.clone())?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
                .port(config.port)
                .tls(Tls::Wrapper(tls))
        }
        TlsMode::None => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        }
    };

    if let (Some(username), Some(password)) = (config.username.as_ref(), config.password.as_ref()) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }

    Ok(builder.build())
}
