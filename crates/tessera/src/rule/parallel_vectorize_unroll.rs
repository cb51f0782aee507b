use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;

use super::analysis::sample_uniform;
use super::{mark_initialized, try_variant, ScheduleRule};

/// Records parallelization, vectorization and unrolling limits on the root
/// block for the post-processors that realize them.
#[derive(Debug, Clone)]
pub struct ParallelizeVectorizeUnroll {
    /// `-1` disables parallelization.
    max_jobs_per_core: i64,
    /// `-1` disables vectorization.
    max_vectorize_extent: i64,
    unroll_max_steps: Vec<i64>,
    unroll_explicit: bool,
    max_parallel_extent: i64,
    initialized: bool,
}

impl ParallelizeVectorizeUnroll {
    pub fn new(
        max_jobs_per_core: i64,
        max_vectorize_extent: i64,
        unroll_max_steps: &[i64],
        unroll_explicit: bool,
    ) -> Self {
        Self {
            max_jobs_per_core,
            max_vectorize_extent,
            unroll_max_steps: unroll_max_steps.to_vec(),
            unroll_explicit,
            max_parallel_extent: -1,
            initialized: false,
        }
    }

    fn annotate(&self, sch: &mut Schedule, root: BlockRV) -> ScheduleResult<()> {
        if self.max_parallel_extent != -1 {
            sch.annotate_block(root, attr::PARALLEL, self.max_parallel_extent)?;
        }
        if self.max_vectorize_extent != -1 {
            sch.annotate_block(root, attr::VECTORIZE, self.max_vectorize_extent)?;
        }
        if self.unrolls(sch) {
            let steps = sample_uniform(sch, &self.unroll_max_steps)?;
            let key = if self.unroll_explicit {
                attr::UNROLL_EXPLICIT
            } else {
                attr::UNROLL_IMPLICIT
            };
            sch.annotate_block(root, key, steps)?;
        }
        Ok(())
    }

    fn unrolls(&self, sch: &Schedule) -> bool {
        !self.unroll_max_steps.is_empty() && !sch.is_spatial_func()
    }
}

impl Default for ParallelizeVectorizeUnroll {
    fn default() -> Self {
        Self::new(16, 16, &[0, 16, 64, 512], true)
    }
}

impl fmt::Display for ParallelizeVectorizeUnroll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParallelizeVectorizeUnroll(max_jobs_per_core={}, max_vectorize_extent={}, \
             unroll_max_steps={:?}, unroll_explicit={})",
            self.max_jobs_per_core,
            self.max_vectorize_extent,
            self.unroll_max_steps,
            self.unroll_explicit
        )
    }
}

impl ScheduleRule for ParallelizeVectorizeUnroll {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        let rule = "ParallelizeVectorizeUnroll";
        if self.max_jobs_per_core != -1 {
            let num_cores = context.require_target(rule)?.num_cores();
            mark_initialized(&mut self.initialized, rule)?;
            self.max_parallel_extent = num_cores.saturating_mul(self.max_jobs_per_core);
            return Ok(());
        }
        mark_initialized(&mut self.initialized, rule)
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if block != sch.root_block() {
            return Vec::new();
        }
        if self.max_parallel_extent == -1 && self.max_vectorize_extent == -1 && !self.unrolls(sch) {
            return Vec::new();
        }
        let annotate = |variant: &mut Schedule| self.annotate(variant, block);
        try_variant(sch, "ParallelizeVectorizeUnroll", annotate)
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
