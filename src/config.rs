//! Client configuration

use crate::error::{ClientError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Prefix of the environment variables read by [`ClientConfig::from_env`]
pub const ENV_PREFIX: &str = "INTERVIEWPREP";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every request path is appended to
    pub api_base_url: String,

    /// Path of the token refresh endpoint, relative to `api_base_url`
    pub refresh_path: String,

    /// Refresh proactively when the access token expires within this many seconds
    pub refresh_window_secs: u64,

    /// Transport timeout for API calls and the refresh exchange
    pub request_timeout_secs: u64,

    /// JSON file persisting the credential across restarts; memory only when unset
    pub storage_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            refresh_path: "/auth/refresh-token".to_string(),
            refresh_window_secs: 600,
            request_timeout_secs: 30,
            storage_path: None,
        }
    }
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `INTERVIEWPREP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Settings file (any format the `config` crate understands), then environment
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(Some(path))
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api_base_url).map_err(|e| {
            ClientError::Configuration(format!("invalid api_base_url {:?}: {e}", self.api_base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "api_base_url must use http or https, got {:?}",
                url.scheme()
            )));
        }
        if self.refresh_window_secs == 0 {
            return Err(ClientError::Configuration("refresh_window_secs must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Configuration("request_timeout_secs must be positive".to_string()));
        }

        if !self.api_base_url.trim_end_matches('/').ends_with("/api") {
            warn!(api_base_url = %self.api_base_url, "api_base_url does not end with /api");
        }

        Ok(())
    }

    /// Absolute URLs pass through, anything else is appended to the base URL
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        let base = self.api_base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn refresh_url(&self) -> String {
        self.build_url(&self.refresh_path)
    }

    pub fn refresh_window(&self) -> Duration {
        Duration::from_secs(self.refresh_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
