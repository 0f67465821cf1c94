//! Detector-level settings loaded from an optional TOML file
//!
//! ```toml
//! node_name = "worker-1"
//!
//! [exporters.log]
//! enabled = true
//!
//! [exporters.webhook]
//! url = "http://127.0.0.1:8080/node-status"
//! timeout_seconds = 10
//! queue_size = 256
//! ```

use crate::error::ConfigError;
use log::{info, warn};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Explicit node name, overridden by `--hostname-override`
    pub node_name: Option<String>,
    pub exporters: ExportersConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportersConfig {
    pub log: LogExporterConfig,
    pub webhook: Option<WebhookExporterConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogExporterConfig {
    pub enabled: bool,
}

impl Default for LogExporterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WebhookExporterConfig {
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_queue_size() -> usize {
    256
}

impl WebhookExporterConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_seconds: default_timeout_seconds(),
            queue_size: default_queue_size(),
        }
    }
}

impl DetectorConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DetectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it does not exist
    ///
    /// A file that exists but cannot be parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("Using default detector configuration");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!(
                "Configuration file '{}' not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        info!("Loading detector configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.node_name {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "node_name must not be empty".to_string(),
                ));
            }
        }
        if let Some(webhook) = &self.exporters.webhook {
            if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "webhook url {:?} must be an http(s) URL",
                    webhook.url
                )));
            }
            if webhook.timeout_seconds == 0 {
                return Err(ConfigError::ValidationError(
                    "webhook timeout_seconds must be above 0".to_string(),
                ));
            }
            if webhook.queue_size == 0 {
                return Err(ConfigError::ValidationError(
                    "webhook queue_size must be above 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}
