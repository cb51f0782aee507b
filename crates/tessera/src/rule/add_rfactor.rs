use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;

use super::analysis::{needs_rfactor_or_cross_thread_reduction, reorder_and_fuse_reduction_loops};
use super::{mark_initialized, ScheduleRule};

/// Factorizes large reductions so that partial results can be computed in
/// parallel on CPUs.
#[derive(Debug, Clone)]
pub struct AddRFactor {
    /// `-1` disables the rule.
    max_jobs_per_core: i64,
    max_innermost_factor: i64,
    max_parallel_extent: i64,
    max_parallel_basic: i64,
    initialized: bool,
}

impl AddRFactor {
    pub fn new(max_jobs_per_core: i64, max_innermost_factor: Option<i64>) -> Self {
        Self {
            max_jobs_per_core,
            max_innermost_factor: max_innermost_factor.unwrap_or(-1),
            max_parallel_extent: -1,
            max_parallel_basic: -1,
            initialized: false,
        }
    }

    fn factorize(&self, sch: &mut Schedule, block: BlockRV) -> ScheduleResult<Vec<Schedule>> {
        let original = sch.fork();
        let mut work = sch.fork();
        let (fused, num_spatial) = reorder_and_fuse_reduction_loops(&mut work, block)?;
        let factors = work.sample_perfect_tile(fused, 2, self.max_innermost_factor)?;
        let factors: Vec<Option<i64>> = factors.into_iter().map(Some).collect();
        let split = work.split(fused, &factors)?;

        let mut results = Vec::with_capacity(split.len() + 1);
        for loop_rv in split {
            let mut variant = work.fork();
            let built = variant.rfactor(loop_rv, num_spatial).and_then(|_| {
                // The write-back block keeps the original id.
                variant.annotate_block(block, attr::RANDOM_COMPUTE_PRODUCER, 1i64)
            });
            match built {
                Ok(()) => results.push(variant),
                Err(err) => log::debug!("AddRFactor: rfactor over {loop_rv} failed: {err}"),
            }
        }
        results.push(original);
        Ok(results)
    }
}

impl Default for AddRFactor {
    fn default() -> Self {
        Self::new(16, None)
    }
}

impl fmt::Display for AddRFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AddRFactor(max_jobs_per_core={}, max_innermost_factor={})",
            self.max_jobs_per_core, self.max_innermost_factor
        )
    }
}

impl ScheduleRule for AddRFactor {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        mark_initialized(&mut self.initialized, "AddRFactor")?;
        if self.max_jobs_per_core == -1 {
            return Ok(());
        }
        let num_cores = context.require_target("AddRFactor")?.num_cores();
        self.max_parallel_basic = num_cores;
        self.max_parallel_extent = num_cores.saturating_mul(self.max_jobs_per_core);
        Ok(())
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if self.max_jobs_per_core == -1 {
            return Vec::new();
        }
        if !needs_rfactor_or_cross_thread_reduction(
            sch,
            block,
            self.max_parallel_extent,
            self.max_parallel_basic,
        ) {
            return Vec::new();
        }
        match self.factorize(sch, block) {
            Ok(results) => results,
            Err(err) => {
                log::debug!("AddRFactor: cannot factorize {block}: {err}");
                Vec::new()
            }
        }
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
