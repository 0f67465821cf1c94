//! Core status types shared by monitors, the problem detector and exporters
//!
//! A monitor reports its view of the node as a [`Status`]: a full snapshot of
//! its latched [`Condition`]s plus the [`Event`]s generated in that cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Latched value of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    /// The problem described by the condition is present
    True,
    /// The problem is not present
    False,
    /// The monitor cannot tell
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Named, latched health indicator owned by exactly one monitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a monitor
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Current value
    pub status: ConditionStatus,
    /// Last time `status` or `reason` changed
    pub transition: Timestamp,
    /// Short machine-readable cause
    pub reason: String,
    /// Human-readable details
    pub message: String,
}

impl Condition {
    /// Whether `status` and `reason` match, ignoring message and transition time
    pub fn same_state(&self, status: ConditionStatus, reason: &str) -> bool {
        self.status == status && self.reason == reason
    }
}

/// Severity of an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, e.g. a condition transition
    Info,
    /// Something went wrong on the node
    Warn,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warn => f.write_str("warn"),
        }
    }
}

/// Point-in-time occurrence, never latched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub severity: Severity,
    pub timestamp: Timestamp,
    pub reason: String,
    pub message: String,
}

impl Event {
    /// Event announcing that a condition moved to a new status/reason
    pub fn condition_changed(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            severity: Severity::Info,
            timestamp,
            reason: reason.to_string(),
            message: format!(
                "Node condition {} is now: {}, reason: {}",
                condition_type, status, reason
            ),
        }
    }
}

/// One monitor's output for a single evaluation cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    /// Name of the monitor that produced this status
    pub source: String,
    /// Full condition snapshot in configuration order
    pub conditions: Vec<Condition>,
    /// Events generated in this cycle only
    pub events: Vec<Event>,
}

/// A metric reading attached to an observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub value: f64,
}

/// Raw input unit evaluated by the rule engine
///
/// Log monitors produce message-only observations; metric monitors attach a
/// [`Sample`] and render it into `message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: Timestamp,
    pub message: String,
    pub sample: Option<Sample>,
}

impl Observation {
    /// Observation carrying only a log line
    pub fn line(timestamp: Timestamp, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            sample: None,
        }
    }

    /// Observation carrying a metric value; `labels` are rendered into the message
    pub fn metric(timestamp: Timestamp, metric: &str, labels: &[(&str, &str)], value: f64) -> Self {
        let message = if labels.is_empty() {
            format!("{} = {:.2}", metric, value)
        } else {
            let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}{{{}}} = {:.2}", metric, rendered.join(","), value)
        };
        Self {
            timestamp,
            message,
            sample: Some(Sample {
                metric: metric.to_string(),
                value,
            }),
        }
    }
}
