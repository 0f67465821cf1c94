//! Rule definitions and observation matchers

use crate::error::ConfigError;
use crate::types::Observation;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Whether a rule latches a condition or only emits events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Updates the named condition
    Permanent,
    /// Only produces warning events
    Temporary,
}

/// How a textual `pattern` is interpreted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Regex,
    Substring,
}

/// Decides whether a single observation matches a rule
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    Substring(String),
    /// Matches samples of `metric` whose value is strictly above `above`
    Threshold { metric: String, above: f64 },
}

impl Matcher {
    pub fn matches(&self, observation: &Observation) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(&observation.message),
            Matcher::Substring(needle) => observation.message.contains(needle.as_str()),
            Matcher::Threshold { metric, above } => observation
                .sample
                .as_ref()
                .is_some_and(|s| &s.metric == metric && s.value > *above),
        }
    }
}

/// A validated rule ready for evaluation
#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_type: RuleType,
    /// Target condition type, set only for permanent rules
    pub condition: Option<String>,
    pub reason: String,
    pub matcher: Matcher,
}

impl Rule {
    pub fn permanent(condition: &str, reason: &str, matcher: Matcher) -> Self {
        Self {
            rule_type: RuleType::Permanent,
            condition: Some(condition.to_string()),
            reason: reason.to_string(),
            matcher,
        }
    }

    pub fn temporary(reason: &str, matcher: Matcher) -> Self {
        Self {
            rule_type: RuleType::Temporary,
            condition: None,
            reason: reason.to_string(),
            matcher,
        }
    }
}

/// Rule as written in a monitor configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub condition: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl RuleConfig {
    /// Validate against the declared condition types and compile the matcher
    pub fn build(&self, declared_conditions: &[&str]) -> Result<Rule, ConfigError> {
        if self.reason.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rule reason must not be empty".to_string(),
            ));
        }

        let matcher = match (&self.pattern, &self.metric, self.threshold) {
            (Some(pattern), None, None) => match self.match_mode {
                MatchMode::Regex => Matcher::Regex(Regex::new(pattern).map_err(|e| {
                    ConfigError::ValidationError(format!("invalid pattern {:?}: {}", pattern, e))
                })?),
                MatchMode::Substring => Matcher::Substring(pattern.clone()),
            },
            (None, Some(metric), Some(above)) => Matcher::Threshold {
                metric: metric.clone(),
                above,
            },
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "rule {:?} needs either a pattern or a metric with a threshold",
                    self.reason
                )))
            }
        };

        let condition = match self.rule_type {
            RuleType::Permanent => {
                let name = self.condition.as_deref().ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "permanent rule {:?} has no condition",
                        self.reason
                    ))
                })?;
                if !declared_conditions.contains(&name) {
                    return Err(ConfigError::ValidationError(format!(
                        "permanent rule {:?} refers to undeclared condition {:?}",
                        self.reason, name
                    )));
                }
                Some(name.to_string())
            }
            RuleType::Temporary => None,
        };

        Ok(Rule {
            rule_type: self.rule_type,
            condition,
            reason: self.reason.clone(),
            matcher,
        })
    }
}
