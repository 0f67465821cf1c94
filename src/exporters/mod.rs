//! Sinks for the merged node status
//!
//! The problem detector calls every exporter from its merge loop, so an
//! exporter must return quickly. Delivery failures are the exporter's own
//! concern; the detector only logs the returned error.

use crate::config::ExportersConfig;
use crate::error::ExportError;
use crate::types::{Condition, Event};
use log::info;

/// Writes node status to the process log
pub mod log_exporter;
/// POSTs node status to an HTTP endpoint
pub mod webhook_exporter;

pub use log_exporter::LogExporter;
pub use webhook_exporter::WebhookExporter;

/// Contract for node status sinks
#[cfg_attr(test, mockall::automock)]
pub trait Exporter: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Receive the full merged condition set after it changed
    fn export_conditions(&self, conditions: &[Condition]) -> Result<(), ExportError>;

    /// Receive one event from `source`, as soon as it arrives
    fn export_event(&self, source: &str, event: &Event) -> Result<(), ExportError>;
}

/// Build every exporter enabled in `config`
pub fn build_exporters(
    config: &ExportersConfig,
    node_name: &str,
) -> Result<Vec<Box<dyn Exporter>>, ExportError> {
    let mut exporters: Vec<Box<dyn Exporter>> = Vec::new();
    if config.log.enabled {
        exporters.push(Box::new(LogExporter::new(node_name)));
    }
    if let Some(webhook) = &config.webhook {
        exporters.push(Box::new(WebhookExporter::new(node_name, webhook)?));
    }
    info!("Built {} exporter(s)", exporters.len());
    Ok(exporters)
}
