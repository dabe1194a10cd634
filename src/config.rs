//! Configuration loading and persistence.
//!
//! Handles reading and writing the pushsync configuration file and
//! applying environment overrides on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants;
use crate::notifications::reconcile::ControllerConfig;
use crate::notifications::vapid::ApplicationServerKey;

/// Configuration for pushsync.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Base URL of the subscription API, e.g. `https://example.com/api/v1`.
    pub api_endpoint: String,
    /// Topic to register under when none is given on the command line.
    pub topic: String,
    /// VAPID public key of the server (base64url), handed to the platform
    /// when a new subscription is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_server_key: Option<String>,
    /// Per-request timeout in seconds for registry calls.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: constants::DEFAULT_API_ENDPOINT.to_string(),
            topic: constants::DEFAULT_TOPIC.to_string(),
            application_server_key: None,
            request_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `PUSHSYNC_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (e.g. ~/.config/pushsync)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var(constants::CONFIG_DIR_ENV) {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("pushsync")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the file holding the local push subscription.
    pub fn subscription_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(constants::SUBSCRIPTION_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?.unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::config_dir()?.join(constants::CONFIG_FILE);
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_endpoint) = std::env::var("PUSHSYNC_API_ENDPOINT") {
            self.api_endpoint = api_endpoint;
        }

        if let Ok(topic) = std::env::var("PUSHSYNC_TOPIC") {
            self.topic = topic;
        }

        if let Ok(key) = std::env::var("PUSHSYNC_APPLICATION_SERVER_KEY") {
            self.application_server_key = Some(key);
        }

        if let Ok(timeout) = std::env::var("PUSHSYNC_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_secs = secs;
            } else {
                log::warn!("Ignoring non-numeric PUSHSYNC_REQUEST_TIMEOUT={timeout}");
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join(constants::CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;

        // Restrictive permissions (owner read/write only) before anything is written
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&config_path)?;
        #[cfg(unix)]
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }

    /// Request timeout for the registry's HTTP client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validated application server key.
    pub fn application_server_key(&self) -> Result<ApplicationServerKey> {
        let key = self.application_server_key.as_deref().context(
            "No application server key configured (set PUSHSYNC_APPLICATION_SERVER_KEY)",
        )?;
        Ok(ApplicationServerKey::from_base64url(key)?)
    }

    /// Controller inputs for `topic`, or the configured topic.
    pub fn controller_config(&self, topic: Option<&str>) -> Result<ControllerConfig> {
        Ok(ControllerConfig {
            topic: topic.unwrap_or(&self.topic).to_string(),
            application_server_key: self.application_server_key()?,
        })
    }
}
