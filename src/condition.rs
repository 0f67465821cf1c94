//! Per-monitor condition table
//!
//! Holds the current value of every condition a monitor owns, in
//! configuration order. Only the owning monitor's loop mutates it.

use crate::types::{Condition, ConditionStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Default condition as declared in a monitor configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionConfig {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl ConditionConfig {
    /// Initial value: status False, transition at `now`
    pub fn initial(&self, now: Timestamp) -> Condition {
        Condition {
            condition_type: self.condition_type.clone(),
            status: ConditionStatus::False,
            transition: now,
            reason: self.reason.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionStore {
    conditions: Vec<Condition>,
}

impl ConditionStore {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    /// Build the initial table from configured defaults
    pub fn from_config(defaults: &[ConditionConfig], now: Timestamp) -> Self {
        Self::new(defaults.iter().map(|c| c.initial(now)).collect())
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Replace the stored condition of the same type
    ///
    /// Returns `true` if the stored value actually changed. Unknown types are
    /// ignored, conditions are never added or removed after construction.
    pub fn update(&mut self, condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(slot) if *slot != condition => {
                *slot = condition;
                true
            }
            _ => false,
        }
    }

    /// Full snapshot in configuration order
    pub fn snapshot(&self) -> Vec<Condition> {
        self.conditions.clone()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
