use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule};

use crate::context::TuneContext;
use crate::error::RuleResult;

use super::{mark_initialized, try_variant, ScheduleRule};

/// Inlines blocks that compute a scalar constant, e.g. `c[()] = 59`.
///
/// Such blocks are produced by constant folding and would otherwise block
/// [`super::AutoInline`] from inlining their consumers, since those then
/// read a non-injective scalar buffer.
#[derive(Debug, Clone, Default)]
pub struct InlineConstantScalars {
    initialized: bool,
}

impl InlineConstantScalars {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for InlineConstantScalars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineConstantScalars")
    }
}

impl ScheduleRule for InlineConstantScalars {
    fn initialize_with_tune_context(&mut self, _context: &TuneContext) -> RuleResult<()> {
        mark_initialized(&mut self.initialized, "InlineConstantScalars")
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        let Ok(node) = sch.block(block) else {
            return Vec::new();
        };
        let scalar_write = node
            .write_buffer()
            .and_then(|buffer| sch.func().buffer(buffer))
            .is_some_and(|buffer| buffer.ndim() == 0);
        if !node.is_leaf() || !node.read_buffers().is_empty() || !scalar_write {
            return Vec::new();
        }
        try_variant(sch, "InlineConstantScalars", |s| s.compute_inline(block))
            .into_iter()
            .collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
