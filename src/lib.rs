/// Error types for the node problem detector
pub mod error;

/// Conditions, events, statuses and observations
pub mod types;

/// Per-monitor condition table
pub mod condition;

/// Rule definitions and the rule engine
pub mod rules;

/// Metric collectors for disks, the host and the detector itself
pub mod collectors;

/// Log backends feeding the log monitor
pub mod watchers;

/// Monitor contract, timing loop and monitor kinds
pub mod monitor;

/// Problem daemon registry
pub mod registry;

/// Aggregation of monitor statuses into node state
pub mod detector;

/// Sinks for merged node status
pub mod exporters;

/// Configuration management
pub mod config;

/// Node identity
pub mod node;

/// HTTP endpoint serving the merged node status
pub mod server;

// Re-export commonly used types
pub use detector::{NodeStatusHandle, ProblemDetector, ShutdownHandle};
pub use error::{CollectorError, ConfigError, DetectorError, ExportError, MonitorError, ServerError};
pub use exporters::Exporter;
pub use monitor::Monitor;
pub use registry::Registry;
pub use server::StatusServer;
pub use types::{Condition, ConditionStatus, Event, Severity, Status};
