//! Monitor contract and the monitor kinds built on top of it
//!
//! Every monitor owns one input source, one condition store and one timing
//! loop. The kinds differ only in how they collect observations, which is
//! captured by [`runner::Probe`].

use crate::error::MonitorError;
use crate::types::Status;
use std::sync::mpsc::Receiver;

/// Log-based monitor (journald or plain file)
pub mod log_monitor;
/// Generic timing loop and lifecycle shared by all monitor kinds
pub mod runner;
/// Monitor watching the detector's own resource usage
pub mod self_monitor;
/// Disk and host statistics monitor
pub mod stats_monitor;

pub use log_monitor::{new_log_monitors, LogMonitorPlugin, LogProbe, WatcherConfig, LOG_MONITOR_NAME};
pub use runner::{LifecycleState, MonitorRunner, Probe};
pub use self_monitor::{new_self_monitors, SelfProbe, SELF_MONITOR_NAME};
pub use stats_monitor::{
    new_stats_monitors, StatsMonitorPlugin, StatsProbe, SYSTEM_STATS_MONITOR_NAME,
};

/// Contract every problem daemon satisfies
///
/// `start` may be called once. On error no channel is returned and the caller
/// must not call `stop`; calling it anyway is harmless. `stop` is idempotent
/// and may be called from any thread.
pub trait Monitor: Send + Sync {
    /// Source name reported in every status
    fn name(&self) -> &str;

    /// Start the timing loop and return the status channel
    fn start(&self) -> Result<Receiver<Status>, MonitorError>;

    /// Request the loop to exit and wait until it has
    fn stop(&self);
}
