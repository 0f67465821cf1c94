use crate::types::Condition;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Merged condition set of the whole node
///
/// Each condition type belongs to the first monitor that reported it. Later
/// reports of the same type from another monitor are ignored, so one monitor
/// can never overwrite another's conditions.
#[derive(Debug, Default)]
pub struct NodeState {
    /// Merged conditions in first-seen order
    conditions: Vec<Condition>,
    /// Condition type to owning monitor index
    owners: HashMap<String, usize>,
    /// Conflicts already logged, to avoid repeating the warning every cycle
    conflicts: HashSet<(String, usize)>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the conditions reported by monitor `monitor`
    ///
    /// Returns whether the merged set changed.
    pub fn apply(&mut self, monitor: usize, source: &str, conditions: &[Condition]) -> bool {
        let mut changed = false;
        for condition in conditions {
            match self.owners.get(&condition.condition_type) {
                Some(&owner) if owner != monitor => {
                    if self
                        .conflicts
                        .insert((condition.condition_type.clone(), monitor))
                    {
                        warn!(
                            "Ignoring condition {} from {}: the type is owned by another monitor",
                            condition.condition_type, source
                        );
                    }
                }
                Some(_) => {
                    if let Some(existing) = self
                        .conditions
                        .iter_mut()
                        .find(|c| c.condition_type == condition.condition_type)
                    {
                        if existing != condition {
                            *existing = condition.clone();
                            changed = true;
                        }
                    }
                }
                None => {
                    self.owners
                        .insert(condition.condition_type.clone(), monitor);
                    self.conditions.push(condition.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Every merged condition, in first-seen order
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

/// Read access to the merged node state from any thread
#[derive(Debug, Clone, Default)]
pub struct NodeStatusHandle {
    state: Arc<RwLock<NodeState>>,
}

impl NodeStatusHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every merged condition
    pub fn conditions(&self) -> Vec<Condition> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    /// Current value of one condition type
    pub fn condition(&self, condition_type: &str) -> Option<Condition> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(condition_type)
            .cloned()
    }

    /// Merge under the write lock; returns the new snapshot if anything changed
    pub(crate) fn apply(
        &self,
        monitor: usize,
        source: &str,
        conditions: &[Condition],
    ) -> Option<Vec<Condition>> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .apply(monitor, source, conditions)
            .then(|| state.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConditionStatus;
    use chrono::{TimeZone, Utc};

    fn condition(condition_type: &str, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            condition_type: condition_type.to_string(),
            status,
            transition: Utc.timestamp_opt(0, 0).unwrap(),
            reason: reason.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_first_report_adds_types() {
        let mut state = NodeState::new();
        assert!(state.apply(
            0,
            "kernel",
            &[
                condition("KernelDeadlock", ConditionStatus::False, "init"),
                condition("ReadonlyFilesystem", ConditionStatus::False, "init"),
            ]
        ));
        assert_eq!(state.len(), 2);
        assert_eq!(state.snapshot()[1].condition_type, "ReadonlyFilesystem");
    }

    #[test]
    fn test_identical_report_is_not_a_change() {
        let mut state = NodeState::new();
        let conditions = [condition("KernelDeadlock", ConditionStatus::False, "init")];
        assert!(state.apply(0, "kernel", &conditions));
        assert!(!state.apply(0, "kernel", &conditions));

        let updated = [condition("KernelDeadlock", ConditionStatus::True, "DockerHung")];
        assert!(state.apply(0, "kernel", &updated));
        assert_eq!(state.get("KernelDeadlock").unwrap().reason, "DockerHung");
    }

    #[test]
    fn test_message_only_refresh_is_a_change() {
        let mut state = NodeState::new();
        let first = Condition {
            message: "line1".to_string(),
            ..condition("KernelDeadlock", ConditionStatus::True, "DeadlockDetected")
        };
        assert!(state.apply(0, "kernel", &[first.clone()]));

        let refreshed = Condition {
            message: "line3".to_string(),
            ..first.clone()
        };
        assert!(state.apply(0, "kernel", &[refreshed]));
        let merged = state.get("KernelDeadlock").unwrap();
        assert_eq!(merged.message, "line3");
        assert_eq!(merged.transition, first.transition);
    }

    #[test]
    fn test_other_monitor_cannot_overwrite() {
        let mut state = NodeState::new();
        state.apply(0, "a", &[condition("Shared", ConditionStatus::False, "a-init")]);

        let changed = state.apply(
            1,
            "b",
            &[
                condition("Shared", ConditionStatus::True, "b-says-so"),
                condition("OnlyB", ConditionStatus::False, "b-init"),
            ],
        );
        assert!(changed);
        assert_eq!(state.get("Shared").unwrap().reason, "a-init");
        assert_eq!(state.get("OnlyB").unwrap().reason, "b-init");

        // A repeated conflicting report changes nothing.
        assert!(!state.apply(1, "b", &[condition("Shared", ConditionStatus::True, "again")]));
    }

    #[test]
    fn test_handle_reports_changes() {
        let handle = NodeStatusHandle::new();
        let conditions = [condition("KernelDeadlock", ConditionStatus::False, "init")];
        assert_eq!(handle.apply(0, "kernel", &conditions).unwrap().len(), 1);
        assert!(handle.apply(0, "kernel", &conditions).is_none());
        assert_eq!(handle.conditions().len(), 1);
        assert!(handle.condition("KernelDeadlock").is_some());
        assert!(handle.condition("Missing").is_none());
    }
}
