//! Log sources feeding the log monitor
//!
//! A watcher tails some log backend on its own thread and pushes parsed
//! [`LogLine`]s into a channel; the log monitor drains that channel once per
//! cycle.

use crate::error::CollectorError;
use crate::types::{Observation, Timestamp};
use std::sync::mpsc::Receiver;

/// Plain text log file follower
pub mod file_watcher;
/// systemd journal follower
pub mod journal_watcher;

pub use file_watcher::FileWatcher;
pub use journal_watcher::JournalWatcher;

/// A single parsed log entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: Timestamp,
    pub message: String,
}

impl From<LogLine> for Observation {
    fn from(line: LogLine) -> Self {
        Observation::line(line.timestamp, line.message)
    }
}

/// Contract for log backends
pub trait LogWatcher: Send {
    /// Open the backend and start pushing lines
    ///
    /// Fails if the backend cannot be opened at all.
    fn watch(&mut self) -> Result<Receiver<LogLine>, CollectorError>;

    /// Stop the background reader; safe to call more than once
    fn stop(&mut self);
}
