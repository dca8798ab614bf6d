//! Session client configuration

use crate::error::CoreResult;
use crate::validation::{ValidateConfig, validators};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration shared by the session layer, the HTTP client and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL for storefront API calls
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Base URL for the authentication endpoints
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,
    /// Renewal endpoint, relative to `auth_base_url`
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Login endpoint, relative to `auth_base_url`
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Renew this many seconds before the access token's stated expiry
    #[serde(default = "default_expiry_skew")]
    pub expiry_skew_secs: u64,
    /// Interval of the observer's liveness probe
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Transport timeout for every outbound request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Where persisted credentials live; defaults to the platform data dir
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_auth_base_url() -> String {
    "http://localhost:5000/api/auth".to_string()
}

fn default_refresh_path() -> String {
    "/refresh".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_expiry_skew() -> u64 {
    60
}

fn default_probe_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            auth_base_url: default_auth_base_url(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            expiry_skew_secs: default_expiry_skew(),
            probe_interval_secs: default_probe_interval(),
            request_timeout_secs: default_request_timeout(),
            credentials_path: None,
        }
    }
}

impl SessionConfig {
    /// Environment variable prefix, e.g. `STOREFRONT__API_BASE_URL`
    pub const ENV_PREFIX: &'static str = "STOREFRONT";

    /// Load configuration from environment and files in common locations
    pub fn load() -> CoreResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let config_paths = ["storefront.toml", "config/storefront.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, with environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn expiry_skew(&self) -> Duration {
        Duration::from_secs(self.expiry_skew_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Full renewal endpoint URL
    pub fn refresh_url(&self) -> String {
        join_url(&self.auth_base_url, &self.refresh_path)
    }

    /// Full login endpoint URL
    pub fn login_url(&self) -> String {
        join_url(&self.auth_base_url, &self.login_path)
    }

    /// Resolved credentials file location
    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("storefront")
                .join("session.json")
        })
    }
}

impl ValidateConfig for SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validators::validate_url(&self.api_base_url, "api_base_url")?;
        validators::validate_url(&self.auth_base_url, "auth_base_url")?;
        validators::validate_path(&self.refresh_path, "refresh_path")?;
        validators::validate_path(&self.login_path, "login_path")?;
        validators::validate_range(self.expiry_skew_secs, 0, 3600, "expiry_skew_secs")?;
        validators::validate_range(self.probe_interval_secs, 1, 86_400, "probe_interval_secs")?;
        validators::validate_range(self.request_timeout_secs, 1, 600, "request_timeout_secs")?;
        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
