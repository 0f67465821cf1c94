use crate::collectors::command::run_with_timeout;
use crate::error::CollectorError;
use crate::types::{Observation, Timestamp};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cumulative IO counters of one block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCounters {
    /// Milliseconds spent doing IO
    pub io_time: u64,
    /// Weighted milliseconds spent doing IO
    pub weighted_io: u64,
}

/// Parse `/proc/diskstats` into per-device counters
///
/// Lines with fewer than 14 fields are skipped.
pub fn parse_diskstats(content: &str) -> HashMap<String, DiskCounters> {
    let mut stats = HashMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let (Ok(io_time), Ok(weighted_io)) = (fields[12].parse(), fields[13].parse()) else {
            debug!("Skipping malformed diskstats line: {}", line);
            continue;
        };
        stats.insert(
            fields[2].to_string(),
            DiskCounters {
                io_time,
                weighted_io,
            },
        );
    }
    stats
}

/// Device names listed in `/proc/partitions`
pub fn parse_partitions(content: &str) -> Vec<String> {
    content
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("major"))
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields.len() == 4).then(|| fields[3].to_string())
        })
        .collect()
}

/// Average IO queue length between two samples of the same device
pub fn average_queue_length(previous: DiskCounters, current: DiskCounters) -> f64 {
    if current.io_time == previous.io_time {
        return 0.0;
    }
    let weighted = current.weighted_io.saturating_sub(previous.weighted_io) as f64;
    let io_time = current.io_time.saturating_sub(previous.io_time) as f64;
    if io_time == 0.0 {
        // Counter wrapped or device was reset.
        return 0.0;
    }
    weighted / io_time
}

/// Samples per-device IO counters and derives the average queue length
pub struct DiskCollector {
    include_root_blk: bool,
    include_all_attached_blk: bool,
    lsblk_timeout: Duration,
    proc_root: PathBuf,
    history: HashMap<String, DiskCounters>,
}

impl DiskCollector {
    pub fn new(include_root_blk: bool, include_all_attached_blk: bool, lsblk_timeout: Duration) -> Self {
        Self {
            include_root_blk,
            include_all_attached_blk,
            lsblk_timeout,
            proc_root: PathBuf::from("/proc"),
            history: HashMap::new(),
        }
    }

    /// Read counters from an alternative procfs root
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Devices to report, or `None` for every device in diskstats
    fn devices(&self) -> Option<BTreeSet<String>> {
        if !self.include_root_blk && !self.include_all_attached_blk {
            return None;
        }

        let mut devices = BTreeSet::new();
        if self.include_root_blk {
            match run_with_timeout("lsblk", &["-d", "-n", "-o", "NAME"], self.lsblk_timeout) {
                Ok(output) => devices.extend(
                    output
                        .lines()
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from),
                ),
                Err(e) => warn!("Failed to list root block devices: {}", e),
            }
        }
        if self.include_all_attached_blk {
            match read(&self.proc_root.join("partitions")) {
                Ok(content) => devices.extend(parse_partitions(&content)),
                Err(e) => warn!("Failed to list attached block devices: {}", e),
            }
        }
        Some(devices)
    }

    pub fn collect(&mut self, now: Timestamp) -> Result<Vec<Observation>, CollectorError> {
        let devices = self.devices();
        let stats = parse_diskstats(&read(&self.proc_root.join("diskstats"))?);

        let mut names: Vec<&String> = stats
            .keys()
            .filter(|name| devices.as_ref().map_or(true, |set| set.contains(*name)))
            .collect();
        names.sort();

        let mut observations = Vec::with_capacity(names.len() * 3);
        for name in names {
            let current = stats[name];
            let previous = self
                .history
                .insert(name.clone(), current)
                .unwrap_or(DiskCounters {
                    io_time: 0,
                    weighted_io: 0,
                });
            let labels = [("device", name.as_str())];

            observations.push(Observation::metric(now, "disk/io_time", &labels, current.io_time as f64));
            observations.push(Observation::metric(
                now,
                "disk/weighted_io",
                &labels,
                current.weighted_io as f64,
            ));
            observations.push(Observation::metric(
                now,
                "disk/avg_queue_len",
                &labels,
                average_queue_length(previous, current),
            ));
        }
        Ok(observations)
    }
}

fn read(path: &Path) -> Result<String, CollectorError> {
    std::fs::read_to_string(path).map_err(CollectorError::IoError)
}
