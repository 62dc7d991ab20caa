//! Relay configuration loaded from a TOML file and environment variables.
//!
//! The configuration is read once at startup and shared read-only behind an
//! `Arc` for the lifetime of the process.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Environment variable holding the upstream base URL (e.g. `https://host/v1`).
pub const ENV_API_BASE: &str = "CHAT_API_BASE";
/// Environment variable holding the upstream bearer credential.
pub const ENV_API_KEY: &str = "CHAT_API_KEY";

/// Message reported when credentials or endpoint are absent.
pub const MISSING_UPSTREAM_CONFIG: &str = "Upstream API key or base URL not configured";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL; `/chat/completions` is appended.
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Fixed system instruction placed before the user turn.
    pub system_prompt: String,
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            system_prompt: "You are a polite AI assistant.".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Base URL and key, or a configuration error when either is missing or blank.
    pub fn credentials(&self) -> Result<(&str, &str), RelayError> {
        let base = self.api_base.as_deref().filter(|s| !s.trim().is_empty());
        let key = self.api_key.as_deref().filter(|s| !s.trim().is_empty());
        match (base, key) {
            (Some(base), Some(key)) => Ok((base, key)),
            _ => Err(RelayError::Configuration(MISSING_UPSTREAM_CONFIG.to_string())),
        }
    }

    /// Full chat-completions URL for the configured base.
    pub fn completions_url(&self) -> Result<String, RelayError> {
        let (base, _) = self.credentials()?;
        Ok(format!("{}/chat/completions", base.trim_end_matches('/')))
    }
}

/// Upstream model identifiers behind the two selectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelMap {
    pub gpt: String,
    pub gemini: String,
}

impl Default for ModelMap {
    fn default() -> Self {
        Self {
            gpt: "turing/gpt-5.2".to_string(),
            gemini: "turing/gemini-3-flash-latest".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, RelayError> {
        toml::from_str(text).map_err(|e| RelayError::Configuration(format!("invalid config: {}", e)))
    }

    /// Environment values win over file values when set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup(ENV_API_BASE) {
            self.upstream.api_base = Some(base);
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.upstream.api_key = Some(key);
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
