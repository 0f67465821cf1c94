/// Rule evaluation against observation batches
pub mod engine;
/// Rule definitions and matchers
pub mod rule;

pub use engine::{evaluate, CycleOutcome, RuleEngine, RuleOutcome};
pub use rule::{MatchMode, Matcher, Rule, RuleConfig, RuleType};
