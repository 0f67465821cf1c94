use crate::collectors::SelfCollector;
use crate::config::MonitorConfig;
use crate::error::{CollectorError, ConfigError};
use crate::monitor::{Monitor, MonitorRunner, Probe};
use crate::types::Observation;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Registry name of the self monitor
pub const SELF_MONITOR_NAME: &str = "self-monitor";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// The self monitor takes no keys beyond the common ones
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfMonitorPlugin {}

/// Probe reporting the detector's own CPU time and memory
#[derive(Debug, Default)]
pub struct SelfProbe {
    collector: SelfCollector,
}

impl SelfProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Probe for SelfProbe {
    fn collect(&mut self) -> Result<Vec<Observation>, CollectorError> {
        self.collector.collect(Utc::now())
    }
}

/// Factory for the self monitor
pub fn new_self_monitors(path: &Path) -> Result<Vec<Box<dyn Monitor>>, ConfigError> {
    let config = MonitorConfig::<SelfMonitorPlugin>::from_file(path, DEFAULT_INTERVAL)?;
    Ok(vec![Box::new(MonitorRunner::from_config(config, SelfProbe::new()))])
}
