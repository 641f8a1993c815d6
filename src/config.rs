use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value `{value}`: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Allowed CORS origin. No CORS layer when unset.
    pub frontend_origin: Option<String>,
    /// Upper bound for a single node's execution. Unlimited when unset.
    pub node_timeout: Option<Duration>,
    pub event_buffer: usize,
    pub log_format: LogFormat,
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| invalid("BIND_ADDR", &bind_raw, e))?;

        let node_timeout = match get("NODE_TIMEOUT_SECONDS") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .map_err(|e| invalid("NODE_TIMEOUT_SECONDS", &raw, e))?;
                if secs == 0 {
                    return Err(invalid("NODE_TIMEOUT_SECONDS", &raw, "must be positive"));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let event_buffer = match get("EVENT_BUFFER") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => return Err(invalid("EVENT_BUFFER", &raw, "must be positive")),
                Ok(n) => n,
                Err(e) => return Err(invalid("EVENT_BUFFER", &raw, e)),
            },
            None => DEFAULT_EVENT_BUFFER,
        };

        let log_format = match get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => LogFormat::Pretty,
            Some(v) if v == "pretty" || v == "text" => LogFormat::Pretty,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", &other, "expected `json` or `pretty`")),
        };

        Ok(Config {
            database_url,
            bind_addr,
            frontend_origin: get("FRONTEND_ORIGIN"),
            node_timeout,
            event_buffer,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/flowdeck")]).expect("config");
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.event_buffer, DEFAULT_EVENT_BUFFER);
        assert_eq!(config.node_timeout, None);
        assert_eq!(config.frontend_origin, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(
            load(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn parses_optional_settings() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("FRONTEND_ORIGIN", "https://app.example.com"),
            ("NODE_TIMEOUT_SECONDS", "45"),
            ("EVENT_BUFFER", "32"),
            ("LOG_FORMAT", "JSON"),
        ])
        .expect("config");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.frontend_origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(config.node_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.event_buffer, 32);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        for (var, value) in [
            ("BIND_ADDR", "nowhere"),
            ("NODE_TIMEOUT_SECONDS", "0"),
            ("NODE_TIMEOUT_SECONDS", "soon"),
            ("EVENT_BUFFER", "0"),
            ("LOG_FORMAT", "xml"),
        ] {
            let err = load(&[("DATABASE_URL", "postgres://db"), (var, value)])
                .expect_err("invalid value should be rejected");
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value} gave {err}"
            );
        }
    }
}
