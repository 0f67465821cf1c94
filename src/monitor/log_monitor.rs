use crate::config::{parse_duration, MonitorConfig};
use crate::error::{CollectorError, ConfigError};
use crate::monitor::{Monitor, MonitorRunner, Probe};
use crate::types::Observation;
use crate::watchers::{FileWatcher, JournalWatcher, LogLine, LogWatcher};
use log::{debug, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

/// Registry name of the log monitor
pub const LOG_MONITOR_NAME: &str = "log-monitor";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const JOURNAL_RUNTIME_DIR: &str = "/run/systemd/journal";

/// Which log backend to follow
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "plugin", rename_all = "lowercase")]
pub enum WatcherConfig {
    Journald {
        #[serde(default)]
        kernel: bool,
        #[serde(default)]
        identifier: Option<String>,
        #[serde(default)]
        lookback: Option<String>,
    },
    File {
        path: PathBuf,
    },
}

/// Log monitor specific keys of the monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogMonitorPlugin {
    pub watcher: WatcherConfig,
}

/// Probe draining a [`LogWatcher`] once per cycle
pub struct LogProbe {
    watcher: Box<dyn LogWatcher>,
    lines: Option<Receiver<LogLine>>,
    closed: bool,
}

impl LogProbe {
    pub fn new(watcher: Box<dyn LogWatcher>) -> Self {
        Self {
            watcher,
            lines: None,
            closed: false,
        }
    }
}

impl Probe for LogProbe {
    fn open(&mut self) -> Result<(), CollectorError> {
        self.lines = Some(self.watcher.watch()?);
        Ok(())
    }

    fn collect(&mut self) -> Result<Vec<Observation>, CollectorError> {
        let Some(lines) = self.lines.as_ref() else {
            if self.closed {
                return Ok(Vec::new());
            }
            return Err(CollectorError::SourceClosed("log watcher is not open".to_string()));
        };

        let mut batch = Vec::new();
        let disconnected = loop {
            match lines.try_recv() {
                Ok(line) => batch.push(Observation::from(line)),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };

        if disconnected {
            // Report the closed source once, then stay quiet.
            self.lines = None;
            self.closed = true;
            if batch.is_empty() {
                return Err(CollectorError::SourceClosed(
                    "log watcher stopped delivering lines".to_string(),
                ));
            }
        }

        debug!("Log probe collected {} line(s)", batch.len());
        Ok(batch)
    }

    fn close(&mut self) {
        self.watcher.stop();
    }
}

fn build_watcher(config: &WatcherConfig) -> Result<Option<Box<dyn LogWatcher>>, ConfigError> {
    match config {
        WatcherConfig::Journald {
            kernel,
            identifier,
            lookback,
        } => {
            if !Path::new(JOURNAL_RUNTIME_DIR).exists() {
                return Ok(None);
            }
            let lookback = lookback.as_deref().map(parse_duration).transpose()?;
            Ok(Some(Box::new(JournalWatcher::new(
                *kernel,
                identifier.clone(),
                lookback,
            ))))
        }
        WatcherConfig::File { path } => Ok(Some(Box::new(FileWatcher::new(path)))),
    }
}

/// Factory for the log monitor
///
/// A journald configuration on a host without a systemd journal is
/// inapplicable and yields no monitor.
pub fn new_log_monitors(path: &Path) -> Result<Vec<Box<dyn Monitor>>, ConfigError> {
    let config = MonitorConfig::<LogMonitorPlugin>::from_file(path, DEFAULT_INTERVAL)?;

    let Some(watcher) = build_watcher(&config.plugin.watcher)? else {
        warn!(
            "No systemd journal on this host, skipping log monitor {} ({})",
            config.source,
            path.display()
        );
        return Ok(Vec::new());
    };

    let monitor = MonitorRunner::from_config(config, LogProbe::new(watcher));
    Ok(vec![Box::new(monitor)])
}
