use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule};

use crate::context::TuneContext;
use crate::error::RuleResult;

use super::ScheduleRule;

pub type InitializeFn = Box<dyn FnMut(&TuneContext) -> RuleResult<()> + Send>;
pub type ApplyFn = Box<dyn FnMut(&mut Schedule, BlockRV) -> Vec<Schedule> + Send>;
pub type CloneFn = Box<dyn Fn() -> Box<dyn ScheduleRule> + Send>;
pub type AsStringFn = Box<dyn Fn() -> String + Send>;

/// A rule assembled from caller-supplied callables, for rules defined
/// outside this crate. Calls are forwarded as they are.
pub struct ExternalRule {
    initialize: InitializeFn,
    apply: ApplyFn,
    clone: CloneFn,
    as_string: AsStringFn,
}

impl ExternalRule {
    pub fn new(
        initialize: InitializeFn,
        apply: ApplyFn,
        clone: CloneFn,
        as_string: AsStringFn,
    ) -> Self {
        Self {
            initialize,
            apply,
            clone,
            as_string,
        }
    }
}

impl fmt::Display for ExternalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&(self.as_string)())
    }
}

impl ScheduleRule for ExternalRule {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        (self.initialize)(context)
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        (self.apply)(sch, block)
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        (self.clone)()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
