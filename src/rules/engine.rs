use crate::condition::ConditionStore;
use crate::rules::rule::{Rule, RuleType};
use crate::types::{Condition, ConditionStatus, Event, Observation, Severity};
use log::{debug, warn};

/// Result of evaluating one rule against one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    /// Events produced by the rule
    pub events: Vec<Event>,
    /// Replacement for the target condition, if it has to change
    pub condition: Option<Condition>,
}

/// Evaluate a single rule against a batch of observations
///
/// `current` is the stored value of the rule's target condition (ignored for
/// temporary rules). A permanent rule only bumps the transition time and emits
/// a "condition changed" event when status or reason actually change; when
/// they are already in place, a differing message is refreshed silently.
pub fn evaluate(rule: &Rule, current: Option<&Condition>, batch: &[Observation]) -> RuleOutcome {
    let matched: Vec<&Observation> = batch.iter().filter(|o| rule.matcher.matches(o)).collect();
    if matched.is_empty() {
        return RuleOutcome::default();
    }

    match rule.rule_type {
        RuleType::Temporary => RuleOutcome {
            events: matched
                .iter()
                .map(|o| Event {
                    severity: Severity::Warn,
                    timestamp: o.timestamp,
                    reason: rule.reason.clone(),
                    message: o.message.clone(),
                })
                .collect(),
            condition: None,
        },
        RuleType::Permanent => {
            let Some(current) = current else {
                warn!(
                    "Rule {:?} targets unknown condition {:?}, skipping",
                    rule.reason, rule.condition
                );
                return RuleOutcome::default();
            };

            let message = matched
                .iter()
                .map(|o| o.message.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            if !current.same_state(ConditionStatus::True, &rule.reason) {
                let transition = matched[0].timestamp;
                RuleOutcome {
                    events: vec![Event::condition_changed(
                        &current.condition_type,
                        ConditionStatus::True,
                        &rule.reason,
                        transition,
                    )],
                    condition: Some(Condition {
                        condition_type: current.condition_type.clone(),
                        status: ConditionStatus::True,
                        transition,
                        reason: rule.reason.clone(),
                        message,
                    }),
                }
            } else if current.message != message {
                RuleOutcome {
                    events: Vec::new(),
                    condition: Some(Condition {
                        message,
                        ..current.clone()
                    }),
                }
            } else {
                RuleOutcome::default()
            }
        }
    }
}

/// Outcome of a whole evaluation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub events: Vec<Event>,
    pub conditions_changed: bool,
}

impl CycleOutcome {
    /// Whether the cycle must be published as a status
    pub fn is_change(&self) -> bool {
        self.conditions_changed || !self.events.is_empty()
    }
}

/// Ordered set of rules evaluated sequentially each cycle
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run every rule in configured order and merge the results into `store`
    pub fn evaluate(&self, store: &mut ConditionStore, batch: &[Observation]) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        for rule in &self.rules {
            let current = rule.condition.as_deref().and_then(|t| store.get(t));
            let result = evaluate(rule, current, batch);
            if let Some(condition) = result.condition {
                debug!(
                    "Rule {:?} updates condition {}",
                    rule.reason, condition.condition_type
                );
                outcome.conditions_changed |= store.update(condition);
            }
            outcome.events.extend(result.events);
        }

        outcome
    }
}
