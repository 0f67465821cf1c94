use crate::error::ExportError;
use crate::exporters::Exporter;
use crate::types::{Condition, ConditionStatus, Event, Severity};
use log::{info, warn};

/// Exporter reporting node status through the `log` facade
pub struct LogExporter {
    node_name: String,
}

impl LogExporter {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    fn format_condition(condition: &Condition) -> String {
        let mut line = format!(
            "{}={} (reason: {}, since {})",
            condition.condition_type,
            condition.status,
            condition.reason,
            condition.transition.to_rfc3339()
        );
        if condition.status == ConditionStatus::True && !condition.message.is_empty() {
            line.push_str(": ");
            line.push_str(&condition.message.replace('\n', " | "));
        }
        line
    }
}

impl Exporter for LogExporter {
    fn name(&self) -> &'static str {
        "log"
    }

    fn export_conditions(&self, conditions: &[Condition]) -> Result<(), ExportError> {
        info!(
            "Node {} has {} condition(s)",
            self.node_name,
            conditions.len()
        );
        for condition in conditions {
            info!("  {}", Self::format_condition(condition));
        }
        Ok(())
    }

    fn export_event(&self, source: &str, event: &Event) -> Result<(), ExportError> {
        match event.severity {
            Severity::Info => info!(
                "[{}] {} event from {}: {}: {}",
                self.node_name, event.severity, source, event.reason, event.message
            ),
            Severity::Warn => warn!(
                "[{}] {} event from {}: {}: {}",
                self.node_name, event.severity, source, event.reason, event.message
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn condition(status: ConditionStatus, message: &str) -> Condition {
        Condition {
            condition_type: "KernelDeadlock".to_string(),
            status,
            transition: Utc.timestamp_opt(0, 0).unwrap(),
            reason: "DockerHung".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_format_condition() {
        assert_eq!(
            LogExporter::format_condition(&condition(ConditionStatus::True, "a\nb")),
            "KernelDeadlock=True (reason: DockerHung, since 1970-01-01T00:00:00+00:00): a | b"
        );
        assert_eq!(
            LogExporter::format_condition(&condition(ConditionStatus::False, "ignored")),
            "KernelDeadlock=False (reason: DockerHung, since 1970-01-01T00:00:00+00:00)"
        );
    }

    #[test]
    fn test_exports_never_fail() {
        let exporter = LogExporter::new("node-1");
        assert_eq!(exporter.name(), "log");
        assert!(exporter
            .export_conditions(&[condition(ConditionStatus::True, "x")])
            .is_ok());
        let event = Event {
            severity: Severity::Warn,
            timestamp: Utc::now(),
            reason: "OOMKilling".to_string(),
            message: "Killed process 42".to_string(),
        };
        assert!(exporter.export_event("kernel-monitor", &event).is_ok());
    }
}
