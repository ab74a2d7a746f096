use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse settings file '{path}': {source}")]
    InvalidFile {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Application API root; every gateway path is appended to it.
    pub api_base_url: String,
    /// Transport-level timeout. The stores add none of their own.
    pub request_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".into(),
            request_timeout_secs: None,
            user_agent: concat!("attendance-client/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl ClientSettings {
    /// Replaces the API root with `raw`, validated like a configured value.
    pub fn with_api_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.api_base_url = normalize_base_url(raw)?;
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

pub fn load_settings() -> Result<ClientSettings, ConfigError> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |name| {
        std::env::var(name).ok()
    })
}

/// Defaults, then the TOML file at `path` if it exists, then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg: FileSettings =
            toml::from_str(&raw).map_err(|source| ConfigError::InvalidFile {
                path: path.display().to_string(),
                source,
            })?;
        if let Some(v) = file_cfg.api_base_url {
            settings.api_base_url = v;
        }
        if let Some(v) = file_cfg.request_timeout_secs {
            settings.request_timeout_secs = Some(v);
        }
        if let Some(v) = file_cfg.user_agent {
            settings.user_agent = v;
        }
    }

    if let Some(v) = env("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        let parsed = v.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
            name: "APP__REQUEST_TIMEOUT_SECS".into(),
            reason: format!("'{v}' is not a number of seconds: {e}"),
        })?;
        settings.request_timeout_secs = (parsed > 0).then_some(parsed);
    }

    if let Some(v) = env("APP__USER_AGENT") {
        settings.user_agent = v;
    }

    settings.api_base_url = normalize_base_url(&settings.api_base_url)?;
    Ok(settings)
}

/// Trims whitespace and trailing slashes; only http and https roots are accepted.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
        name: "api_base_url".into(),
        reason: format!("'{raw}' is not a valid URL: {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            name: "api_base_url".into(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
