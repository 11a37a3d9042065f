use std::env;
use std::net::SocketAddr;

use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AGENT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SQL_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_DEVICE_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_BIND_PORT: u16 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub agent_model: String,
    pub sql_model: String,
}

impl LlmSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))
    }
}

/// Process configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub device_timezone: Tz,
    pub bind: SocketAddr,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .or_else(|| lookup("CROPWATCH_DATABASE_URL"))
            .ok_or(ConfigError::Missing("DATABASE_URL (or CROPWATCH_DATABASE_URL)"))?;

        let max_connections = match lookup("CROPWATCH_DB_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().map_err(|err| ConfigError::Invalid {
                name: "CROPWATCH_DB_MAX_CONNECTIONS",
                value: value.clone(),
                reason: err.to_string(),
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let device_timezone = match lookup("CROPWATCH_DEVICE_TIMEZONE") {
            Some(value) => value.parse::<Tz>().map_err(|err| ConfigError::Invalid {
                name: "CROPWATCH_DEVICE_TIMEZONE",
                value: value.clone(),
                reason: err.to_string(),
            })?,
            None => DEFAULT_DEVICE_TIMEZONE,
        };

        let bind = match (lookup("CROPWATCH_BIND"), lookup("PORT")) {
            (Some(value), _) => value.parse::<SocketAddr>().map_err(|err| ConfigError::Invalid {
                name: "CROPWATCH_BIND",
                value: value.clone(),
                reason: err.to_string(),
            })?,
            (None, Some(port)) => {
                let port = port.parse::<u16>().map_err(|err| ConfigError::Invalid {
                    name: "PORT",
                    value: port.clone(),
                    reason: err.to_string(),
                })?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            (None, None) => SocketAddr::from(([0, 0, 0, 0], DEFAULT_BIND_PORT)),
        };

        let llm = LlmSettings {
            api_key: lookup("OPENAI_API_KEY").filter(|key| !key.is_empty()),
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            agent_model: lookup("CROPWATCH_AGENT_MODEL")
                .unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string()),
            sql_model: lookup("CROPWATCH_SQL_MODEL")
                .unwrap_or_else(|| DEFAULT_SQL_MODEL.to_string()),
        };

        Ok(Settings {
            database: DatabaseSettings {
                url,
                max_connections,
            },
            llm,
            device_timezone,
            bind,
        })
    }
}
