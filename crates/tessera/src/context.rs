use crate::error::{RuleError, RuleResult};
use crate::target::Target;

/// Read-only tuning facts handed to rules before they are applied.
#[derive(Debug, Clone, Default)]
pub struct TuneContext {
    pub target: Option<Target>,
    /// Seed for rule-owned random streams; `None` draws one from the OS.
    pub rand_seed: Option<u64>,
}

impl TuneContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rand_seed = Some(seed);
        self
    }

    /// The target, or [`RuleError::MissingTarget`] naming the rule that needs it.
    pub fn require_target(&self, rule: &str) -> RuleResult<&Target> {
        self.target
            .as_ref()
            .ok_or_else(|| RuleError::MissingTarget(rule.to_string()))
    }

    pub fn seed(&self) -> u64 {
        self.rand_seed.unwrap_or_else(rand::random)
    }
}
