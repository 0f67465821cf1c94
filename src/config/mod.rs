/// Detector-level TOML configuration
pub mod detector;
/// Duration string parsing
pub mod duration;
/// Per-monitor JSON configuration
pub mod monitor;

pub use detector::{DetectorConfig, ExportersConfig, LogExporterConfig, WebhookExporterConfig};
pub use duration::parse_duration;
pub use monitor::MonitorConfig;
