//! JSON configuration shared by every monitor kind
//!
//! ```json
//! {
//!   "source": "kernel-monitor",
//!   "invokeInterval": "5s",
//!   "conditions": [{"type": "KernelDeadlock", "reason": "KernelHasNoDeadlock"}],
//!   "rules": [{"type": "temporary", "reason": "OOMKilling", "pattern": "Killed process \\d+"}],
//!   "watcher": {"plugin": "journald", "kernel": true}
//! }
//! ```
//!
//! Kind-specific keys are flattened into the plugin type `T`.

use crate::condition::ConditionConfig;
use crate::config::duration::parse_duration;
use crate::error::ConfigError;
use crate::rules::{Rule, RuleConfig};
use log::info;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMonitorConfig<T> {
    source: String,
    #[serde(default)]
    invoke_interval: Option<String>,
    #[serde(default)]
    conditions: Vec<ConditionConfig>,
    #[serde(default)]
    rules: Vec<RuleConfig>,
    #[serde(flatten)]
    plugin: T,
}

/// Validated monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig<T> {
    pub source: String,
    pub invoke_interval: Duration,
    pub conditions: Vec<ConditionConfig>,
    pub rules: Vec<Rule>,
    pub plugin: T,
}

impl<T: DeserializeOwned> MonitorConfig<T> {
    /// Read, parse and validate a monitor configuration file
    pub fn from_file(path: &Path, default_interval: Duration) -> Result<Self, ConfigError> {
        info!("Loading monitor configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e))?;
        Self::from_json(&content, default_interval)
    }

    pub fn from_json(content: &str, default_interval: Duration) -> Result<Self, ConfigError> {
        let raw: RawMonitorConfig<T> = serde_json::from_str(content)?;

        if raw.source.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source must not be empty".to_string(),
            ));
        }

        let invoke_interval = match raw.invoke_interval.as_deref() {
            Some(text) => parse_duration(text)?,
            None => default_interval,
        };
        if invoke_interval.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "invokeInterval {:?} must be above 0s",
                invoke_interval
            )));
        }

        let mut seen = HashSet::new();
        for condition in &raw.conditions {
            if !seen.insert(condition.condition_type.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate condition type {:?}",
                    condition.condition_type
                )));
            }
        }

        let declared: Vec<&str> = raw
            .conditions
            .iter()
            .map(|c| c.condition_type.as_str())
            .collect();
        let rules = raw
            .rules
            .iter()
            .map(|r| r.build(&declared))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: raw.source,
            invoke_interval,
            conditions: raw.conditions,
            rules,
            plugin: raw.plugin,
        })
    }
}
