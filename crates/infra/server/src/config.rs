//! Server configuration.

use league_webhooks::WebhookConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "LEAGUE_WEBHOOKS_CONFIG";

/// Server-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Log level, used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Address to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from a TOML file with optional `[server]` and
/// `[webhooks]` sections.
pub fn load_config(path: &str) -> Result<(ServerConfig, WebhookConfig), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<(ServerConfig, WebhookConfig), ConfigError> {
    let config: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let server: ServerConfig = config
        .get("server")
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?
        .unwrap_or_default();

    let webhooks: WebhookConfig = config
        .get("webhooks")
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?
        .unwrap_or_default();
    webhooks
        .validate()
        .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

    Ok((server, webhooks))
}

/// Picks the configuration file: the first CLI argument, then [`CONFIG_ENV`].
pub fn config_path(mut args: impl Iterator<Item = String>, env: Option<String>) -> Option<String> {
    args.next().or(env).filter(|p| !p.is_empty())
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
