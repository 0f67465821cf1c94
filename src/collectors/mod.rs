/// Bounded execution of external utilities
pub mod command;

/// Block device IO statistics from procfs
pub mod disk_collector;

/// Uptime, load and memory statistics of the host
pub mod host_collector;

/// Resource usage of the detector process
pub mod self_collector;

pub use disk_collector::DiskCollector;
pub use host_collector::HostCollector;
pub use self_collector::SelfCollector;
