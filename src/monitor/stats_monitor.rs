use crate::collectors::{DiskCollector, HostCollector};
use crate::config::{parse_duration, MonitorConfig};
use crate::error::{CollectorError, ConfigError};
use crate::monitor::{Monitor, MonitorRunner, Probe};
use crate::types::Observation;
use chrono::Utc;
use log::warn;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Registry name of the system stats monitor
pub const SYSTEM_STATS_MONITOR_NAME: &str = "system-stats-monitor";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LSBLK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStatsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub include_root_blk: bool,
    #[serde(default)]
    pub include_all_attached_blk: bool,
    #[serde(default)]
    pub lsblk_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostStatsConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Stats monitor specific keys of the monitor configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsMonitorPlugin {
    #[serde(default)]
    pub disk: DiskStatsConfig,
    #[serde(default)]
    pub host: HostStatsConfig,
}

impl StatsMonitorPlugin {
    fn lsblk_timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = match self.disk.lsblk_timeout.as_deref() {
            Some(text) => parse_duration(text)?,
            None => DEFAULT_LSBLK_TIMEOUT,
        };
        if timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "disk.lsblkTimeout must be above 0s".to_string(),
            ));
        }
        Ok(timeout)
    }
}

/// Probe sampling the enabled disk and host collectors
pub struct StatsProbe {
    disk: Option<DiskCollector>,
    host: Option<HostCollector>,
}

impl StatsProbe {
    pub fn new(disk: Option<DiskCollector>, host: Option<HostCollector>) -> Self {
        Self { disk, host }
    }

    fn from_plugin(plugin: &StatsMonitorPlugin) -> Result<Self, ConfigError> {
        let disk = if plugin.disk.enabled {
            Some(DiskCollector::new(
                plugin.disk.include_root_blk,
                plugin.disk.include_all_attached_blk,
                plugin.lsblk_timeout()?,
            ))
        } else {
            None
        };
        let host = plugin.host.enabled.then(HostCollector::new);
        Ok(Self::new(disk, host))
    }

    fn is_empty(&self) -> bool {
        self.disk.is_none() && self.host.is_none()
    }
}

impl Probe for StatsProbe {
    fn collect(&mut self) -> Result<Vec<Observation>, CollectorError> {
        let now = Utc::now();
        let mut observations = Vec::new();
        let mut failure = None;

        if let Some(disk) = self.disk.as_mut() {
            match disk.collect(now) {
                Ok(mut batch) => observations.append(&mut batch),
                Err(e) => {
                    warn!("Disk stats collection failed: {}", e);
                    failure = Some(e);
                }
            }
        }

        if let Some(host) = self.host.as_ref() {
            match host.collect(now) {
                Ok(mut batch) => observations.append(&mut batch),
                Err(e) => {
                    warn!("Host stats collection failed: {}", e);
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if observations.is_empty() => Err(e),
            _ => Ok(observations),
        }
    }
}

/// Factory for the system stats monitor
///
/// A configuration enabling no collector yields no monitor.
pub fn new_stats_monitors(path: &Path) -> Result<Vec<Box<dyn Monitor>>, ConfigError> {
    let config = MonitorConfig::<StatsMonitorPlugin>::from_file(path, DEFAULT_INTERVAL)?;
    let probe = StatsProbe::from_plugin(&config.plugin)?;

    if probe.is_empty() {
        warn!(
            "System stats monitor {} enables no collector, skipping",
            config.source
        );
        return Ok(Vec::new());
    }

    Ok(vec![Box::new(MonitorRunner::from_config(config, probe))])
}
