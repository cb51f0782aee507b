use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule};

use crate::context::TuneContext;
use crate::error::{RuleError, RuleResult};

use super::analysis::{needs_rfactor_or_cross_thread_reduction, reorder_and_fuse_reduction_loops};
use super::{mark_initialized, try_variant, ScheduleRule};

/// Reduces across the threads of a GPU thread block: the fused reduction
/// loop is split and its inner part bound to `threadIdx.x`.
#[derive(Debug, Clone)]
pub struct CrossThreadReduction {
    thread_extents: Vec<i64>,
    max_threads_per_block: i64,
    warp_size: i64,
    initialized: bool,
}

impl CrossThreadReduction {
    pub fn new(thread_extents: &[i64]) -> RuleResult<Self> {
        if let Some(extent) = thread_extents.iter().find(|extent| **extent <= 0) {
            return Err(RuleError::InvalidThreadExtent(*extent));
        }
        Ok(Self {
            thread_extents: thread_extents.to_vec(),
            max_threads_per_block: -1,
            warp_size: -1,
            initialized: false,
        })
    }
}

impl fmt::Display for CrossThreadReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extents = &self.thread_extents;
        write!(f, "CrossThreadReduction(thread_extents={extents:?})")
    }
}

impl ScheduleRule for CrossThreadReduction {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        let rule = "CrossThreadReduction";
        let target = context.require_target(rule)?;
        let max_threads_per_block = target.require_max_threads_per_block()?;
        let warp_size = target.require_thread_warp_size()?;
        mark_initialized(&mut self.initialized, rule)?;
        self.max_threads_per_block = max_threads_per_block;
        self.warp_size = warp_size;
        Ok(())
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        let max_threads = self.max_threads_per_block;
        if !needs_rfactor_or_cross_thread_reduction(sch, block, max_threads, self.warp_size) {
            return Vec::new();
        }
        let mut results = Vec::new();
        for extent in &self.thread_extents {
            if *extent > self.max_threads_per_block {
                continue;
            }
            let variant = try_variant(sch, "CrossThreadReduction", |variant| {
                let (fused, _) = reorder_and_fuse_reduction_loops(variant, block)?;
                let split = variant.split(fused, &[None, Some(*extent)])?;
                match split.last() {
                    Some(inner) => variant.bind(*inner, "threadIdx.x"),
                    None => Ok(()),
                }
            });
            results.extend(variant);
        }
        results
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
