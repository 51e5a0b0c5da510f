use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "https://localhost:8081";
pub const DEFAULT_USERNAME: &str = "testuser";
const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 20_000;

/// Client settings, usually read from a TOML file.
///
/// ```toml
/// server_url = "https://localhost:8081"
/// username = "testuser"
/// device_timeout_ms = 20000
/// allow_insecure = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// Every relying-party call is made on behalf of this single account.
    pub username: String,
    pub device_timeout_ms: u64,
    pub allow_insecure: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            username: DEFAULT_USERNAME.to_owned(),
            device_timeout_ms: DEFAULT_DEVICE_TIMEOUT_MS,
            allow_insecure: false,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(?path, "Loading client configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Rejects a `server_url` that is not an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason,
        };
        let url = Url::parse(&self.server_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(format!("unsupported scheme {scheme:?}"))),
        }
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }
}
