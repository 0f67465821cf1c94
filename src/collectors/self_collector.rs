use crate::error::CollectorError;
use crate::types::{Observation, Timestamp};

/// Resident set size from the contents of `/proc/self/status`, in bytes
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

fn rusage() -> Result<libc::rusage, CollectorError> {
    // SAFETY: getrusage only writes into the zeroed struct we hand it.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            Ok(usage)
        } else {
            Err(CollectorError::IoError(std::io::Error::last_os_error()))
        }
    }
}

fn timeval_seconds(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
}

/// Resource usage of the detector process itself
#[derive(Debug, Default)]
pub struct SelfCollector;

impl SelfCollector {
    pub fn new() -> Self {
        Self
    }

    /// Current resident memory in bytes
    ///
    /// Prefers `/proc/self/status` and falls back to the peak RSS reported by
    /// `getrusage` where procfs is not available.
    fn memory_usage(usage: &libc::rusage) -> u64 {
        if let Some(rss) = std::fs::read_to_string("/proc/self/status")
            .ok()
            .as_deref()
            .and_then(parse_vm_rss)
        {
            return rss;
        }

        // ru_maxrss is in KB on Linux, bytes on macOS
        #[cfg(target_os = "macos")]
        return usage.ru_maxrss as u64;

        #[cfg(not(target_os = "macos"))]
        return (usage.ru_maxrss as u64) * 1024;
    }

    pub fn collect(&self, now: Timestamp) -> Result<Vec<Observation>, CollectorError> {
        let usage = rusage()?;
        let cpu_total = timeval_seconds(usage.ru_utime) + timeval_seconds(usage.ru_stime);
        let memory = Self::memory_usage(&usage);

        Ok(vec![
            Observation::metric(now, "self/cpu_total", &[], cpu_total),
            Observation::metric(now, "self/memory", &[], memory as f64),
        ])
    }
}
