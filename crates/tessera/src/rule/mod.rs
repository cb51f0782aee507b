//! Schedule rules and the rule catalog.
//!
//! A rule looks at one block of a schedule and proposes zero or more
//! transformed copies of the schedule. An empty result means the rule does
//! not apply to the block; the input schedule is then used unchanged by the
//! design-space driver.

mod add_rfactor;
pub(crate) mod analysis;
mod apply_custom_rule;
mod auto_bind;
mod auto_inline;
mod cross_thread_reduction;
mod external;
mod inline_constant_scalars;
pub mod multi_level_tiling;
mod parallel_vectorize_unroll;
mod random_compute_location;

use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule, ScheduleResult};

use crate::context::TuneContext;
use crate::error::RuleResult;

pub use add_rfactor::AddRFactor;
pub use apply_custom_rule::{
    custom_rules, register_custom_rule, ApplyCustomRule, CustomRuleFn, CustomRuleRegistry,
};
pub use auto_bind::AutoBind;
pub use auto_inline::AutoInline;
pub use cross_thread_reduction::CrossThreadReduction;
pub use external::{ApplyFn, AsStringFn, CloneFn, ExternalRule, InitializeFn};
pub use inline_constant_scalars::InlineConstantScalars;
pub use multi_level_tiling::{
    IntrinGroup, MultiLevelTiling, MultiLevelTilingTensorCore, MultiLevelTilingWideVector,
    MultiLevelTilingWithIntrin, ReuseConfig, ReuseType, TilingFilter,
};
pub use parallel_vectorize_unroll::ParallelizeVectorizeUnroll;
pub use random_compute_location::RandomComputeLocation;

/// A design-space generation rule.
///
/// `initialize_with_tune_context` is called once before the first `apply`.
/// `apply` must not change the structure of the schedule it is given:
/// variants are built on [`Schedule::fork`]s of it.
pub trait ScheduleRule: fmt::Display + Send {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()>;

    /// Proposes variants of `sch` for `block`; empty when not applicable.
    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule>;

    /// Deep copy. Rules owning a random stream reseed the copy from it.
    fn clone_rule(&self) -> Box<dyn ScheduleRule>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn ScheduleRule> {
    fn clone(&self) -> Self {
        self.clone_rule()
    }
}

impl fmt::Debug for dyn ScheduleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Whether `rule` is the custom-rule dispatch sentinel.
pub fn is_apply_custom_rule(rule: &dyn ScheduleRule) -> bool {
    rule.as_any().is::<ApplyCustomRule>()
}

/// Runs `build` on a fork of `sch`. A primitive failure means the variant is
/// not legal; it is logged and dropped.
pub(crate) fn try_variant<F>(sch: &mut Schedule, rule: &str, build: F) -> Option<Schedule>
where
    F: FnOnce(&mut Schedule) -> ScheduleResult<()>,
{
    let mut variant = sch.fork();
    match build(&mut variant) {
        Ok(()) => Some(variant),
        Err(err) => {
            log::debug!("{rule}: dropping variant: {err}");
            None
        }
    }
}

/// Fails with [`crate::RuleError::AlreadyInitialized`] when the flag is set,
/// and sets it otherwise.
pub(crate) fn mark_initialized(flag: &mut bool, rule: &str) -> RuleResult<()> {
    if *flag {
        return Err(crate::error::RuleError::AlreadyInitialized(rule.to_string()));
    }
    *flag = true;
    Ok(())
}
