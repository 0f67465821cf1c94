use crate::error::CollectorError;
use crate::types::{Observation, Timestamp};
use log::warn;
use std::path::PathBuf;

fn first_number(content: &str, what: &str) -> Result<f64, CollectorError> {
    content
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| CollectorError::ParseError(format!("no value in {}", what)))
}

/// Seconds since boot from `/proc/uptime`
pub fn parse_uptime(content: &str) -> Result<f64, CollectorError> {
    first_number(content, "uptime")
}

/// One minute load average from `/proc/loadavg`
pub fn parse_load1(content: &str) -> Result<f64, CollectorError> {
    first_number(content, "loadavg")
}

/// `MemAvailable` from `/proc/meminfo`, in bytes
pub fn parse_mem_available(content: &str) -> Result<u64, CollectorError> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| CollectorError::ParseError("MemAvailable not found in meminfo".to_string()))
}

/// Host level statistics
///
/// Each metric is read independently; a failing one is logged and left out.
/// The cycle only fails when nothing could be read.
pub struct HostCollector {
    proc_root: PathBuf,
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCollector {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    fn read_metric<T>(
        &self,
        file: &str,
        parse: impl Fn(&str) -> Result<T, CollectorError>,
    ) -> Result<T, CollectorError> {
        let content = std::fs::read_to_string(self.proc_root.join(file))?;
        parse(&content)
    }

    pub fn collect(&self, now: Timestamp) -> Result<Vec<Observation>, CollectorError> {
        let readings = [
            ("host/uptime", self.read_metric("uptime", parse_uptime)),
            ("host/load1", self.read_metric("loadavg", parse_load1)),
            (
                "host/memory_available_bytes",
                self.read_metric("meminfo", parse_mem_available).map(|b| b as f64),
            ),
        ];

        let mut observations = Vec::new();
        let mut last_error = None;
        for (metric, reading) in readings {
            match reading {
                Ok(value) => observations.push(Observation::metric(now, metric, &[], value)),
                Err(e) => {
                    warn!("Failed to read {}: {}", metric, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if observations.is_empty() => Err(e),
            _ => Ok(observations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_parse_proc_files() {
        assert_eq!(parse_uptime("350735.47 234388.90\n").unwrap(), 350735.47);
        assert_eq!(parse_load1("0.42 0.30 0.25 1/123 4567\n").unwrap(), 0.42);
        let meminfo = "MemTotal:       16314276 kB\nMemFree:         1106308 kB\nMemAvailable:    8196040 kB\n";
        assert_eq!(parse_mem_available(meminfo).unwrap(), 8_196_040 * 1024);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_uptime("").is_err());
        assert!(parse_load1("abc").is_err());
        assert!(parse_mem_available("MemTotal: 1 kB\n").is_err());
    }

    #[test]
    fn test_collect_partial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("uptime"), "10.00 5.00\n").unwrap();
        std::fs::write(dir.path().join("loadavg"), "1.50 1.00 0.50 1/1 1\n").unwrap();

        let collector = HostCollector::new().with_proc_root(dir.path());
        let observations = collector.collect(Utc::now()).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].message, "host/uptime = 10.00");
        assert_eq!(observations[1].sample.as_ref().unwrap().value, 1.5);
    }

    #[test]
    fn test_collect_nothing_readable() {
        let dir = tempfile::tempdir().unwrap();
        let collector = HostCollector::new().with_proc_root(dir.path());
        assert!(collector.collect(Utc::now()).is_err());
    }
}
