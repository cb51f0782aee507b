//! Dispatch to hand-written rules named by the `schedule_rule` block
//! annotation.
//!
//! Custom rules are registered under a `(target key, rule name)` pair. A
//! block annotated `schedule_rule = "my_rule"` on a target whose keys are
//! `["cuda", "gpu"]` is handed to the rule registered as `("cuda", "my_rule")`,
//! or failing that `("gpu", "my_rule")`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use tessera_tir::{BlockRV, Schedule};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;

use super::{mark_initialized, ScheduleRule};

/// A hand-written rule. Like [`ScheduleRule::apply`], it should build its
/// variants on forks of the schedule it is given.
pub type CustomRuleFn = Arc<dyn Fn(&mut Schedule, BlockRV) -> Vec<Schedule> + Send + Sync>;

/// Thread-safe map from `(target key, rule name)` to custom rules.
pub struct CustomRuleRegistry {
    rules: RwLock<HashMap<(String, String), CustomRuleFn>>,
}

impl CustomRuleRegistry {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `rule`, replacing any rule previously registered under the
    /// same key and name.
    pub fn register<F>(&self, key: &str, name: &str, rule: F)
    where
        F: Fn(&mut Schedule, BlockRV) -> Vec<Schedule> + Send + Sync + 'static,
    {
        self.rules
            .write()
            .expect("custom rule registry poisoned")
            .insert((key.to_string(), name.to_string()), Arc::new(rule));
    }

    pub fn get(&self, key: &str, name: &str) -> Option<CustomRuleFn> {
        self.rules
            .read()
            .expect("custom rule registry poisoned")
            .get(&(key.to_string(), name.to_string()))
            .cloned()
    }

    /// Registered `(key, name)` pairs, sorted.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .rules
            .read()
            .expect("custom rule registry poisoned")
            .keys()
            .cloned()
            .collect();
        entries.sort();
        entries
    }
}

impl Default for CustomRuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<CustomRuleRegistry>> = OnceLock::new();

/// The process-wide registry used by [`ApplyCustomRule::new`].
pub fn custom_rules() -> Arc<CustomRuleRegistry> {
    Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(CustomRuleRegistry::new())))
}

/// Registers a custom rule in the process-wide registry.
pub fn register_custom_rule<F>(key: &str, name: &str, rule: F)
where
    F: Fn(&mut Schedule, BlockRV) -> Vec<Schedule> + Send + Sync + 'static,
{
    custom_rules().register(key, name, rule);
}

/// Hands annotated blocks to their custom rule.
#[derive(Clone)]
pub struct ApplyCustomRule {
    registry: Arc<CustomRuleRegistry>,
    target_keys: Vec<String>,
    initialized: bool,
}

impl ApplyCustomRule {
    pub fn new() -> Self {
        Self::with_registry(custom_rules())
    }

    pub fn with_registry(registry: Arc<CustomRuleRegistry>) -> Self {
        Self {
            registry,
            target_keys: Vec::new(),
            initialized: false,
        }
    }
}

impl Default for ApplyCustomRule {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApplyCustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApplyCustomRule")
    }
}

impl ScheduleRule for ApplyCustomRule {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        let keys = context.require_target("ApplyCustomRule")?.keys.clone();
        mark_initialized(&mut self.initialized, "ApplyCustomRule")?;
        self.target_keys = keys;
        Ok(())
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        let Some(name) = sch
            .block_annotation(block, attr::SCHEDULE_RULE)
            .and_then(|value| value.as_str())
            .map(str::to_string)
        else {
            return Vec::new();
        };
        if name == "None" {
            return Vec::new();
        }
        let found = self
            .target_keys
            .iter()
            .find_map(|key| self.registry.get(key, &name));
        if let Some(rule) = found {
            return rule(sch, block);
        }
        let keys = &self.target_keys;
        log::warn!(
            "custom rule `{name}` is not registered for target keys {keys:?}, using defaults"
        );
        if let Err(err) = sch.unannotate_block(block, attr::SCHEDULE_RULE) {
            log::debug!("ApplyCustomRule: cannot clear annotation on {block}: {err}");
        }
        Vec::new()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
